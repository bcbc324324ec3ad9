// [apps/controller/src/services/ip_store.rs]
//! IPStore (§4.5): in-memory per-user source-IP set with TTL eviction,
//! flushed to the `ips` column on a timer via `StoreManager`.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use controller_store::StoreManager;

/// `timestamps[(node, username)][ip] = last-seen instant`. Keyed by the full
/// `(node, username)` identity (§3 IPBinding) rather than username alone, so
/// two nodes that happen to share a username never clobber each other's IPs.
pub struct IpStore {
    timestamps: RwLock<HashMap<(String, String), HashMap<String, Instant>>>,
    ttl: Duration,
}

impl IpStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            timestamps: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn add_ips(&self, node: &str, username: &str, ips: &[String]) {
        if ips.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut guard = self.timestamps.write().unwrap();
        let entry = guard.entry((node.to_string(), username.to_string())).or_default();
        for ip in ips {
            entry.insert(ip.clone(), now);
        }
    }

    /// Returns the still-valid IPs per `(node, username)` and concurrently
    /// evicts every entry (and user) whose stamp has aged past the TTL
    /// (§4.5, scenario 5).
    pub fn collect_and_cleanup(&self) -> HashMap<(String, String), Vec<String>> {
        let now = Instant::now();
        let mut guard = self.timestamps.write().unwrap();
        let mut out = HashMap::new();

        guard.retain(|identity, ips| {
            ips.retain(|_, stamp| now.duration_since(*stamp) <= self.ttl);
            if ips.is_empty() {
                return false;
            }
            out.insert(identity.clone(), ips.keys().cloned().collect());
            true
        });

        out
    }

    /// Flushes every user's valid IP set to the store as a comma-joined
    /// string, one high-priority transaction per user (§4.5).
    pub async fn flush(&self, manager: &StoreManager) {
        let collected = self.collect_and_cleanup();
        if collected.is_empty() {
            return;
        }
        debug!(users = collected.len(), "flushing IP store");

        for ((node, username), ips) in collected {
            let joined = ips.join(",");
            let result = manager
                .execute_high(move |handle| {
                    let node = node.clone();
                    let username = username.clone();
                    let joined = joined.clone();
                    async move { handle.set_ips(&node, &username, &joined).await }
                })
                .await;
            if let Err(err) = result {
                tracing::warn!("failed to flush an IP set: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn ip_added_is_visible_until_ttl_expires() {
        let store = IpStore::new(Duration::from_millis(60));
        store.add_ips("A", "alice", &["1.1.1.1".to_string()]);

        let collected = store.collect_and_cleanup();
        assert_eq!(
            collected.get(&("A".to_string(), "alice".to_string())).unwrap(),
            &vec!["1.1.1.1".to_string()]
        );

        sleep(Duration::from_millis(80));
        let collected = store.collect_and_cleanup();
        assert!(collected.get(&("A".to_string(), "alice".to_string())).is_none());
    }

    #[test]
    fn a_fresher_ip_survives_while_an_older_one_for_the_same_user_expires() {
        let store = IpStore::new(Duration::from_millis(60));
        store.add_ips("A", "alice", &["1.1.1.1".to_string()]);
        sleep(Duration::from_millis(40));
        store.add_ips("A", "alice", &["2.2.2.2".to_string()]);
        sleep(Duration::from_millis(40));

        let collected = store.collect_and_cleanup();
        assert_eq!(
            collected.get(&("A".to_string(), "alice".to_string())).unwrap(),
            &vec!["2.2.2.2".to_string()]
        );
    }

    #[test]
    fn same_username_on_different_nodes_does_not_collide() {
        let store = IpStore::new(Duration::from_millis(60));
        store.add_ips("A", "alice", &["1.1.1.1".to_string()]);
        store.add_ips("B", "alice", &["2.2.2.2".to_string()]);

        let collected = store.collect_and_cleanup();
        assert_eq!(
            collected.get(&("A".to_string(), "alice".to_string())).unwrap(),
            &vec!["1.1.1.1".to_string()]
        );
        assert_eq!(
            collected.get(&("B".to_string(), "alice".to_string())).unwrap(),
            &vec!["2.2.2.2".to_string()]
        );
    }
}
