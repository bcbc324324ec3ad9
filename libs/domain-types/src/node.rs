//! Node identity and connection lifecycle state.

use serde::{Deserialize, Serialize};

/// Which proxy core a node runs; drives the shape of the roster JSON the
/// `ExternalRoster` capability must produce for it (§9 REDESIGN FLAGS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreKind {
    Xray,
    Singbox,
}

/// Per-node connection state as observed by the StreamMultiplexer.
/// Declared `Disconnected -> Connecting -> Connected -> (Error | Disconnected)`;
/// the stream handle is never observable while in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

/// Static declaration of a remote node agent, read once from configuration
/// at startup. Nodes are never created at runtime in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub endpoint: String,
    pub core_kind: CoreKind,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl Node {
    pub fn is_local(&self) -> bool {
        self.endpoint.contains("127.0.0.1")
            || self.endpoint.contains("localhost")
            || self.endpoint.contains("::1")
    }
}
