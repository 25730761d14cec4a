/// Failure while flattening or hydrating a value graph.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No reducer, built-in or structural form applies.
    #[error("Cannot stringify {type_name} at {path}")]
    Unserializable { type_name: &'static str, path: String },

    #[error("Cannot stringify POJOs with symbolic keys at {path}")]
    SymbolKey { path: String },

    #[error("Cannot box {kind} at {path}")]
    Unboxable { kind: &'static str, path: String },

    #[error("Unknown type {0}")]
    UnknownTag(String),

    /// A reviver's payload led back to the record being revived.
    #[error("Cycle through {tag} record at index {index}")]
    ReviverCycle { tag: String, index: usize },

    #[error("Value graph nests deeper than {limit} levels at {location}")]
    TooDeep { limit: usize, location: String },

    #[error("Invalid record index {0}")]
    InvalidIndex(i64),

    #[error("Malformed record at index {index}: {reason}")]
    Malformed { index: usize, reason: String },

    /// A reducer or reviver rejected its input.
    #[error("{tag}: {reason}")]
    Handler { tag: &'static str, reason: String },

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] ::base64::DecodeError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    pub fn handler(tag: &'static str, reason: impl Into<String>) -> Self {
        Self::Handler {
            tag,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(index: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            index,
            reason: reason.into(),
        }
    }
}
