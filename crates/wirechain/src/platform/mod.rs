//! Platform reducers and revivers, layered in a fixed order: clonable
//! built-ins, then HTTP shapes, then capabilities.

mod capability;
mod clonable;
mod http;

use std::sync::Arc;

pub use capability::{Capability, CapabilityTag, SYNCHRONOUS_METHODS};
pub use clonable::{Clonable, ClonableTag};
pub use self::http::{Http, HttpTag};

use crate::codec::{Reducer, Reviver};
use crate::heap::{CapabilityHeap, StubFactory};

/// The combined handler table for one side of a connection.
#[derive(Clone)]
pub struct Platform {
    capability: Capability,
}

impl Platform {
    /// Table for the side that owns the objects being called.
    pub fn serving(heap: Arc<CapabilityHeap>) -> Self {
        Self {
            capability: Capability::serving(heap),
        }
    }

    /// Table for the side holding remote handles.
    pub fn calling(factory: Arc<dyn StubFactory>) -> Self {
        Self {
            capability: Capability::calling(factory),
        }
    }

    /// Table without stub support, for plain value exchange.
    pub fn detached() -> Self {
        Self {
            capability: Capability::detached(),
        }
    }

    pub fn reducers(&self) -> [&dyn Reducer; 3] {
        [&Clonable, &Http, &self.capability]
    }

    pub fn revivers(&self) -> [&dyn Reviver; 3] {
        [&Clonable, &Http, &self.capability]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse, stringify};
    use crate::value::{Composite, ErrorKind, ErrorValue, HttpResponse, Value};

    #[test]
    fn layers_compose() {
        let platform = Platform::detached();
        let mut response = HttpResponse::new(500);
        response.cf = Value::error(ErrorKind::SyntaxError, "bad json");
        let root = Value::object([
            ("response", Value::node(Composite::Response(response))),
            ("bytes", Value::array_buffer(vec![0xff])),
            (
                "error",
                Value::node(Composite::Error(ErrorValue::new(ErrorKind::Error, "x"))),
            ),
        ]);

        let text = stringify(&root, &platform.reducers()).unwrap();
        let decoded = parse(&text, &platform.revivers()).unwrap();
        assert!(decoded.deep_eq(&root));
    }

    #[test]
    fn platform_array_buffers_shadow_the_builtin_form() {
        let platform = Platform::detached();
        let text = stringify(&Value::array_buffer(vec![1]), &platform.reducers()).unwrap();
        assert_eq!(text, r#"[["ArrayBuffer",1],"AQ=="]"#);
        assert!(parse(&text, &platform.revivers()).is_ok());
    }
}
