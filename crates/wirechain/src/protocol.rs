//! Wire shapes for call submission and call results.
//!
//! Both directions are value graphs, so these types only define how the
//! roots look:
//! - **Submission**: `{chain: [link...], targetHeapId?: id}`
//! - **Result**: `{data: value}` or `{error: value}`
//!
//! A link is `{type: "get", property}` or `{type: "apply", arguments}`.

use serde::{Deserialize, Serialize};

use crate::value::{Composite, Value};

/// Opaque id for a live object registered in a capability heap.
///
/// UUID v4 so ids minted concurrently never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(uuid::Uuid);

impl CapabilityId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for CapabilityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("invalid capability id: {0}")]
    InvalidCapabilityId(#[from] uuid::Error),
}

impl ProtocolError {
    fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

/// One recorded operation.
#[derive(Debug, Clone)]
pub enum Link {
    Get { property: String },
    Apply { arguments: Vec<Value> },
}

impl Link {
    pub fn get(property: impl Into<String>) -> Self {
        Self::Get {
            property: property.into(),
        }
    }

    pub fn apply(arguments: Vec<Value>) -> Self {
        Self::Apply { arguments }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Get { property } => Value::object([
                ("type", Value::from("get")),
                ("property", Value::from(property.as_str())),
            ]),
            Self::Apply { arguments } => Value::object([
                ("type", Value::from("apply")),
                ("arguments", Value::array(arguments.iter().cloned())),
            ]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        match value.get("type").as_str() {
            Some("get") => match value.get("property") {
                Value::String(property) => Ok(Self::Get { property }),
                other => Err(ProtocolError::malformed(
                    "link",
                    format!("get property must be a string, got {}", other.type_name()),
                )),
            },
            Some("apply") => {
                let arguments = value.get("arguments");
                let Some(node) = arguments.as_node() else {
                    return Err(ProtocolError::malformed("link", "apply without arguments"));
                };
                match &*node.read() {
                    Composite::Array(items) => Ok(Self::Apply {
                        arguments: items.iter().map(|v| v.clone().unwrap_or_default()).collect(),
                    }),
                    other => Err(ProtocolError::malformed(
                        "link",
                        format!("apply arguments must be an array, got {}", other.type_name()),
                    )),
                }
            }
            Some(other) => Err(ProtocolError::malformed(
                "link",
                format!("unknown link type {other:?}"),
            )),
            None => Err(ProtocolError::malformed("link", "missing type")),
        }
    }
}

fn chain_to_value(chain: &[Link], target: Option<CapabilityId>) -> Value {
    let mut entries = vec![("chain", Value::array(chain.iter().map(Link::to_value)))];
    if let Some(id) = target {
        entries.push(("targetHeapId", Value::from(id.to_string())));
    }
    Value::object(entries)
}

fn chain_from_value(
    value: &Value,
    what: &'static str,
) -> Result<(Vec<Link>, Option<CapabilityId>), ProtocolError> {
    let chain = value.get("chain");
    let links = match chain.as_node().map(|n| n.read()) {
        Some(guard) => match &*guard {
            Composite::Array(items) => items
                .iter()
                .map(|item| Link::from_value(&item.clone().unwrap_or_default()))
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(ProtocolError::malformed(what, "chain must be an array")),
        },
        None => return Err(ProtocolError::malformed(what, "missing chain")),
    };
    let target = match value.get("targetHeapId") {
        Value::Undefined | Value::Null => None,
        Value::String(id) => Some(CapabilityId::parse(&id)?),
        other => {
            return Err(ProtocolError::malformed(
                what,
                format!("targetHeapId must be a string, got {}", other.type_name()),
            ));
        }
    };
    Ok((links, target))
}

/// Captured, not-yet-resolved chain passed as an argument to another chain.
#[derive(Debug, Clone, Default)]
pub struct ChainMarker {
    pub chain: Vec<Link>,
    pub target: Option<CapabilityId>,
}

impl ChainMarker {
    /// Marker pointing at a capability with an empty chain.
    pub fn capability(id: CapabilityId) -> Self {
        Self {
            chain: Vec::new(),
            target: Some(id),
        }
    }

    pub fn to_value(&self) -> Value {
        chain_to_value(&self.chain, self.target)
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let (chain, target) = chain_from_value(value, "unresolved chain")?;
        Ok(Self { chain, target })
    }
}

/// Root of a call submission.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub chain: Vec<Link>,
    pub target: Option<CapabilityId>,
}

impl Submission {
    pub fn to_value(&self) -> Value {
        chain_to_value(&self.chain, self.target)
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let (chain, target) = chain_from_value(value, "submission")?;
        Ok(Self { chain, target })
    }
}

/// Root of a call result.
#[derive(Debug, Clone)]
pub enum CallResult {
    Data(Value),
    Error(Value),
}

impl CallResult {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Data(data) => Value::object([("data", data.clone())]),
            Self::Error(error) => Value::object([("error", error.clone())]),
        }
    }

    /// A nullish `error` slot counts as success.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        if value.as_node().is_none() {
            return Err(ProtocolError::malformed(
                "call result",
                format!("expected an object, got {}", value.type_name()),
            ));
        }
        let error = value.get("error");
        if !error.is_nullish() {
            return Ok(Self::Error(error));
        }
        Ok(Self::Data(value.get("data")))
    }

    pub fn into_result(self) -> Result<Value, Value> {
        match self {
            Self::Data(data) => Ok(data),
            Self::Error(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_capability_id() -> CapabilityId {
        CapabilityId(uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap())
    }

    #[test]
    fn capability_id_is_transparent_string() {
        let json = serde_json::to_string(&test_capability_id()).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        assert_eq!(
            CapabilityId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            test_capability_id()
        );
    }

    #[test]
    fn links_read_back() {
        let get = Link::from_value(&Link::get("user").to_value()).unwrap();
        assert!(matches!(get, Link::Get { ref property } if property == "user"));

        let apply = Link::from_value(&Link::apply(vec![Value::from("id-1")]).to_value()).unwrap();
        match apply {
            Link::Apply { arguments } => assert_eq!(arguments[0].as_str(), Some("id-1")),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_link_type_is_rejected() {
        let bogus = Value::object([("type", Value::from("set"))]);
        let err = Link::from_value(&bogus).unwrap_err();
        assert_eq!(err.to_string(), "malformed link: unknown link type \"set\"");
    }

    #[test]
    fn submission_omits_absent_target() {
        let submission = Submission {
            chain: vec![Link::get("a")],
            target: None,
        };
        let value = submission.to_value();
        assert!(value.get("targetHeapId").is_undefined());

        let back = Submission::from_value(&value).unwrap();
        assert_eq!(back.chain.len(), 1);
        assert!(back.target.is_none());
    }

    #[test]
    fn marker_carries_target() {
        let marker = ChainMarker::capability(test_capability_id());
        let back = ChainMarker::from_value(&marker.to_value()).unwrap();
        assert_eq!(back.target, Some(test_capability_id()));
        assert!(back.chain.is_empty());
    }

    #[test]
    fn call_result_prefers_error_slot() {
        let err = CallResult::from_value(&CallResult::Error(Value::from("boom")).to_value()).unwrap();
        assert!(matches!(err, CallResult::Error(_)));

        let ok = CallResult::from_value(&Value::object([
            ("data", Value::from(1)),
            ("error", Value::Null),
        ]))
        .unwrap();
        assert_eq!(ok.into_result().unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn call_result_must_be_object() {
        assert!(CallResult::from_value(&Value::from(1)).is_err());
    }
}
