//! Live handles and internal platform objects.
//!
//! - `RpcStub`: a local object passed by reference. The serving side mints it
//!   into its heap and sends the id; the calling side revives the id through
//!   its [`StubFactory`].
//! - `UnresolvedChain`: a chain captured as an argument, sent as
//!   `{chain, targetHeapId}`.
//! - `InternalClass`: platform object sent as `[className, properties, body]`.
//! - `SynchronousMethod`: allow-listed method result captured where it ran.

use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;

use crate::body::BodyStream;
use crate::codec::{CodecError, Reduced, Reducer, Reviver};
use crate::heap::{CapabilityHeap, StubFactory};
use crate::protocol::{CapabilityId, ChainMarker};
use crate::value::{Composite, InternalObject, Node, SyncMethod, Value, object_properties};

/// Methods whose results may be captured and shipped.
pub const SYNCHRONOUS_METHODS: [&str; 3] = [
    "Checksums::toJSON",
    "HeadResult::writeHttpMetadata",
    "GetResult::writeHttpMetadata",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityTag {
    RpcStub,
    UnresolvedChain,
    InternalClass,
    SynchronousMethod,
}

impl CapabilityTag {
    pub fn name(self) -> &'static str {
        match self {
            Self::RpcStub => "RpcStub",
            Self::UnresolvedChain => "UnresolvedChain",
            Self::InternalClass => "InternalClass",
            Self::SynchronousMethod => "SynchronousMethod",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RpcStub" => Some(Self::RpcStub),
            "UnresolvedChain" => Some(Self::UnresolvedChain),
            "InternalClass" => Some(Self::InternalClass),
            "SynchronousMethod" => Some(Self::SynchronousMethod),
            _ => None,
        }
    }
}

/// Which end of the connection this layer serves.
#[derive(Clone)]
enum Side {
    /// Mints outgoing stubs and resolves incoming ids against the heap.
    Serving(Arc<CapabilityHeap>),
    /// Turns incoming ids into remote handles.
    Calling(Arc<dyn StubFactory>),
    Detached,
}

#[derive(Clone)]
pub struct Capability {
    side: Side,
}

impl Capability {
    pub fn serving(heap: Arc<CapabilityHeap>) -> Self {
        Self {
            side: Side::Serving(heap),
        }
    }

    pub fn calling(factory: Arc<dyn StubFactory>) -> Self {
        Self {
            side: Side::Calling(factory),
        }
    }

    /// Neither mints nor revives stubs; the other tags still work.
    pub fn detached() -> Self {
        Self { side: Side::Detached }
    }
}

impl Reducer for Capability {
    fn reduce(&self, node: &Node) -> Result<Option<Reduced>, CodecError> {
        let reduced = match &*node.read() {
            Composite::Stub(target) => {
                let Side::Serving(heap) = &self.side else {
                    return Err(CodecError::handler(
                        "RpcStub",
                        "stubs can only be sent by the serving side",
                    ));
                };
                let id = heap.mint(target.clone());
                Reduced::new(CapabilityTag::RpcStub.name(), Value::from(id.to_string()))
            }
            Composite::Chain(handle) => {
                Reduced::new(CapabilityTag::UnresolvedChain.name(), handle.marker().to_value())
            }
            Composite::Marker(marker) => {
                Reduced::new(CapabilityTag::UnresolvedChain.name(), marker.to_value())
            }
            Composite::Internal(internal) => {
                let mut payload = vec![
                    Value::from(internal.class_name.as_str()),
                    object_properties(internal.properties.clone()),
                ];
                if let Some(body) = &internal.body {
                    payload.push(Value::stream(body.clone()));
                }
                Reduced::new(CapabilityTag::InternalClass.name(), Value::array(payload))
            }
            Composite::SyncMethod(method) => {
                if !SYNCHRONOUS_METHODS.contains(&method.name.as_str()) {
                    return Err(CodecError::handler(
                        "SynchronousMethod",
                        format!("{} is not an allowed method", method.name),
                    ));
                }
                Reduced::new(
                    CapabilityTag::SynchronousMethod.name(),
                    Value::array([Value::from(method.name.as_str()), method.result.clone()]),
                )
            }
            _ => return Ok(None),
        };
        Ok(Some(reduced))
    }
}

impl Reviver for Capability {
    fn handles(&self, tag: &str) -> bool {
        CapabilityTag::from_name(tag).is_some()
    }

    fn revive(&self, tag: &str, payload: Value) -> Result<Value, CodecError> {
        match CapabilityTag::from_name(tag) {
            Some(CapabilityTag::RpcStub) => {
                let id = payload
                    .as_str()
                    .ok_or_else(|| CodecError::handler("RpcStub", "payload must be an id"))
                    .and_then(|s| {
                        CapabilityId::parse(s).map_err(|e| CodecError::handler("RpcStub", e.to_string()))
                    })?;
                self.revive_id(id)
            }
            Some(CapabilityTag::UnresolvedChain) => {
                let marker = ChainMarker::from_value(&payload)
                    .map_err(|e| CodecError::handler("UnresolvedChain", e.to_string()))?;
                match (&self.side, marker.target) {
                    (Side::Calling(factory), Some(id)) if marker.chain.is_empty() => {
                        Ok(factory.stub(id))
                    }
                    _ => Ok(Value::node(Composite::Marker(marker))),
                }
            }
            Some(CapabilityTag::InternalClass) => revive_internal(&payload),
            Some(CapabilityTag::SynchronousMethod) => {
                let name = payload.index(0);
                let name = name
                    .as_str()
                    .filter(|name| SYNCHRONOUS_METHODS.contains(name))
                    .ok_or_else(|| {
                        CodecError::handler("SynchronousMethod", format!("{name:?} is not an allowed method"))
                    })?;
                Ok(Value::node(Composite::SyncMethod(SyncMethod {
                    name: name.to_string(),
                    result: payload.index(1),
                })))
            }
            None => Err(CodecError::UnknownTag(tag.to_string())),
        }
    }
}

impl Capability {
    fn revive_id(&self, id: CapabilityId) -> Result<Value, CodecError> {
        match &self.side {
            Side::Calling(factory) => Ok(factory.stub(id)),
            Side::Serving(heap) => heap
                .resolve(&id)
                .map_err(|e| CodecError::handler("RpcStub", e.to_string())),
            Side::Detached => Err(CodecError::handler(
                "RpcStub",
                format!("no heap or stub factory to revive {id}"),
            )),
        }
    }
}

fn revive_internal(payload: &Value) -> Result<Value, CodecError> {
    let class_name = payload
        .index(0)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CodecError::handler("InternalClass", "class name must be a string"))?;

    let properties = match payload.index(1).as_node().map(|n| n.read()) {
        Some(guard) => match &*guard {
            Composite::Object(object) => object.properties.clone(),
            _ => IndexMap::new(),
        },
        None => IndexMap::new(),
    };

    let body = match payload.index(2).as_node().map(|n| n.read()) {
        Some(guard) => match &*guard {
            Composite::Stream(stream) => Some(stream.clone()),
            Composite::ArrayBuffer(bytes) => {
                Some(BodyStream::from_bytes(Bytes::from(bytes.clone())))
            }
            _ => None,
        },
        None => None,
    };

    Ok(Value::node(Composite::Internal(InternalObject {
        class_name,
        properties,
        body,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse, stringify};
    use crate::protocol::Link;
    use crate::value::HeaderList;

    struct MarkerFactory;

    impl StubFactory for MarkerFactory {
        fn stub(&self, id: CapabilityId) -> Value {
            Value::object([("stubFor", Value::from(id.to_string()))])
        }
    }

    #[test]
    fn serving_side_mints_stubs() {
        let heap = CapabilityHeap::new();
        let layer = Capability::serving(Arc::clone(&heap));
        let target = Value::object([("secret", Value::from(42))]);

        let text = stringify(&Value::stub(target.clone()), &[&layer]).unwrap();
        assert_eq!(heap.len(), 1);

        let revived = parse(&text, &[&layer]).unwrap();
        assert!(revived.same_value(&target));
    }

    #[test]
    fn calling_side_cannot_send_stubs() {
        let layer = Capability::calling(Arc::new(MarkerFactory));
        let err = stringify(&Value::stub(Value::empty_object()), &[&layer]).unwrap_err();
        assert_eq!(err.to_string(), "RpcStub: stubs can only be sent by the serving side");
    }

    #[test]
    fn calling_side_revives_ids_through_factory() {
        let heap = CapabilityHeap::new();
        let text = stringify(
            &Value::stub(Value::empty_object()),
            &[&Capability::serving(heap)],
        )
        .unwrap();

        let revived = parse(&text, &[&Capability::calling(Arc::new(MarkerFactory))]).unwrap();
        assert!(revived.get("stubFor").as_str().is_some());
    }

    #[test]
    fn markers_roundtrip_as_markers_on_serving_side() {
        let id = CapabilityId::new();
        let marker = ChainMarker {
            chain: vec![Link::get("user"), Link::apply(vec![Value::from("id-1")])],
            target: Some(id),
        };
        let layer = Capability::serving(CapabilityHeap::new());
        let text = stringify(&Value::node(Composite::Marker(marker)), &[&layer]).unwrap();
        let revived = parse(&text, &[&layer]).unwrap();

        let Composite::Marker(back) = &*revived.as_node().unwrap().read() else {
            panic!("not a marker");
        };
        assert_eq!(back.target, Some(id));
        assert_eq!(back.chain.len(), 2);
    }

    #[test]
    fn empty_marker_becomes_stub_on_calling_side() {
        let marker = ChainMarker::capability(CapabilityId::new());
        let text = stringify(
            &Value::node(Composite::Marker(marker)),
            &[&Capability::detached()],
        )
        .unwrap();
        let revived = parse(&text, &[&Capability::calling(Arc::new(MarkerFactory))]).unwrap();
        assert!(revived.get("stubFor").as_str().is_some());
    }

    #[test]
    fn internal_objects_carry_allowed_methods() {
        let checksums = InternalObject::new("Checksums")
            .with_method("toJSON", Value::object([("md5", Value::from("abc"))]));
        let head = InternalObject::new("HeadResult")
            .with_property("key", Value::from("a.txt"))
            .with_property("checksums", Value::node(Composite::Internal(checksums)))
            .with_method(
                "writeHttpMetadata",
                Value::node(Composite::Headers(HeaderList::new())),
            );
        let root = Value::node(Composite::Internal(head));

        let layers: [&dyn Reducer; 2] = [&crate::platform::Http, &Capability::detached()];
        let text = stringify(&root, &layers).unwrap();
        let revivers: [&dyn Reviver; 2] = [&crate::platform::Http, &Capability::detached()];
        let decoded = parse(&text, &revivers).unwrap();
        assert!(decoded.deep_eq(&root));
        assert_eq!(decoded.get("key").as_str(), Some("a.txt"));
    }

    #[test]
    fn disallowed_methods_are_rejected() {
        let object = InternalObject::new("GetResult").with_method("arrayBuffer", Value::Null);
        let err = stringify(
            &Value::node(Composite::Internal(object)),
            &[&Capability::detached()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("GetResult::arrayBuffer is not an allowed method"));

        let forged = r#"[["SynchronousMethod",1],[2,-1],"Env::secret"]"#;
        assert!(parse(forged, &[&Capability::detached()]).is_err());
    }

    #[test]
    fn internal_properties_are_plain_objects() {
        let object = InternalObject::new("R2Object").with_property("size", Value::from(3));
        let text = stringify(
            &Value::node(Composite::Internal(object)),
            &[&Capability::detached()],
        )
        .unwrap();
        insta::assert_snapshot!(text, @r#"[["InternalClass",1],[2,3],"R2Object",{"size":4},3]"#);
    }
}
