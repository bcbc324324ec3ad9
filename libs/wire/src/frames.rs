//! The node stream protocol's sum types (§6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `StreamConfig` must be the first client-to-server frame after connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub interval_seconds: i32,
}

/// Requests the node's authoritative roster; sent once on connect and again
/// on every `roster-refresh` tick (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListUsersRequest {}

/// Client-to-server sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
    StreamConfig(StreamConfig),
    ListUsersRequest(ListUsersRequest),
}

/// One `(name, value)` pair from a `StatsFrame`. `name` parses as four
/// `">>>"`-separated parts; `value` is a string-encoded i64 (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRecord {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsFrame {
    pub stats: Vec<StatsRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBinding {
    pub credential: String,
    pub inbound_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub enabled: bool,
    pub bindings: Vec<UserBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersFrame {
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLogData {
    pub valid_ips: Vec<String>,
    pub dns_stats: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDataFrame {
    pub user_log_data: HashMap<String, UserLogData>,
}

/// Server-to-client sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerFrame {
    Stats(StatsFrame),
    Users(UsersFrame),
    LogData(LogDataFrame),
}

/// Splits a stats record name on `">>>"`. Only parts 1 (subject/class
/// depending on position) and 3 (direction) are meaningful per §4.3; the
/// caller is responsible for interpreting which index holds the class.
pub fn split_stat_name(name: &str) -> Option<[&str; 4]> {
    let mut parts = name.split(">>>");
    let class = parts.next()?;
    let subject = parts.next()?;
    let direction = parts.next()?;
    let reserved = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return None;
    }
    Some([class, subject, direction, reserved])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_four_part_names() {
        let parts = split_stat_name("user>>>alice>>>uplink>>>").unwrap();
        assert_eq!(parts, ["user", "alice", "uplink", ""]);
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(split_stat_name("user>>>alice").is_none());
    }
}
