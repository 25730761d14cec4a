//! Version information reported by servers and sent by clients.

/// Crate version from Cargo.toml.
pub const WIRECHAIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the envelope and submission format.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub wirechain: &'static str,
    pub protocol: u32,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            wirechain: WIRECHAIN_VERSION,
            protocol: PROTOCOL_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `User-Agent` sent by the HTTP client transport.
pub fn user_agent() -> String {
    format!("wirechain/{WIRECHAIN_VERSION}")
}
