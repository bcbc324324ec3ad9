//! CredentialBinding, InboundTraffic, and DnsRecord entities (§3).

use serde::{Deserialize, Serialize};

/// `(node, username, credential, inbound_tag)`, a unique 4-tuple identity.
/// Credential is opaque: a UUID for VLESS, a password for TROJAN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBinding {
    pub node: String,
    pub username: String,
    pub credential: String,
    pub inbound_tag: String,
}

/// Per-`(node, source)` counters mirroring `User` counters at inbound-tag
/// granularity. `source` is the inbound tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundTraffic {
    pub node: String,
    pub source: String,
    pub uplink: i64,
    pub downlink: i64,
    pub sess_uplink: i64,
    pub sess_downlink: i64,
    pub rate: i64,
}

impl InboundTraffic {
    pub fn new(node: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            source: source.into(),
            uplink: 0,
            downlink: 0,
            sess_uplink: 0,
            sess_downlink: 0,
            rate: 0,
        }
    }
}

/// `(node, username, domain, count)`. Primary key is the triple; `count`
/// accumulates forever unless explicitly cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub node: String,
    pub username: String,
    pub domain: String,
    pub count: i64,
}
