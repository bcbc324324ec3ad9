//! The User entity: a credential holder on one node (§3).

use serde::{Deserialize, Serialize};

/// Literal value written to `last_seen` while a user's instantaneous rate is
/// above the online threshold.
pub const LAST_SEEN_ONLINE: &str = "online";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub node: String,
    pub username: String,
    pub enabled: bool,
    pub created_at: String,
    /// `"YYYY-MM-DD-HH"`, hour precision; empty string means unlimited.
    pub sub_end: String,
    pub renew_days: i64,
    pub ip_limit: i64,
    pub last_seen: String,
    pub uplink: i64,
    pub downlink: i64,
    pub sess_uplink: i64,
    pub sess_downlink: i64,
    pub rate: i64,
    pub ips: String,
}

impl User {
    pub fn new(node: impl Into<String>, username: impl Into<String>, created_at: String) -> Self {
        Self {
            node: node.into(),
            username: username.into(),
            enabled: true,
            created_at: created_at.clone(),
            sub_end: String::new(),
            renew_days: 0,
            ip_limit: 0,
            last_seen: created_at,
            uplink: 0,
            downlink: 0,
            sess_uplink: 0,
            sess_downlink: 0,
            rate: 0,
            ips: String::new(),
        }
    }

    pub fn enabled_str(&self) -> &'static str {
        if self.enabled {
            "true"
        } else {
            "false"
        }
    }
}
