// [apps/controller/src/services/aggregator.rs]
//! DeltaAggregator (§4.3): turns each node's absolute counter snapshots into
//! monotonically additive deltas, keyed per `(node, subject, direction)`.
//! The in-memory `ExpectedAbsolute`/`inactive` maps are the only state this
//! component owns; every write goes through `StoreManager::execute_high` so
//! the aggregator itself never touches the store directly.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use controller_domain::user::LAST_SEEN_ONLINE;
use controller_store::StoreManager;
use controller_wire::{split_stat_name, StatsFrame};

/// Administrative stat classes carried by `StatsFrame` that are not part of
/// the traffic model and must be discarded before pairing (§4.3).
fn is_tracked_class(class: &str) -> bool {
    matches!(class, "user" | "inbound")
}

#[derive(Default)]
struct PendingCounters {
    uplink: Option<i64>,
    downlink: Option<i64>,
}

/// Per-subject delta after pairing the uplink/downlink records of one frame.
struct SubjectDelta {
    subject: String,
    delta_uplink: i64,
    delta_downlink: i64,
    sess_uplink: i64,
    sess_downlink: i64,
}

/// Converts absolute counters into deltas against the last value seen per
/// `(node, subject, direction)`, and derives `rate_bps`. Holds no store
/// handle; the caller submits the resulting writes through `StoreManager`.
pub struct DeltaAggregator {
    /// `ExpectedAbsolute[node]["<subject> <direction>"] = last absolute value`.
    expected_absolute: Mutex<HashMap<String, HashMap<String, i64>>>,
    /// Whether any frame has been processed yet for a node; gates the
    /// "first frame: absolutes only, no deltas" initialization guard.
    seen_nodes: Mutex<std::collections::HashSet<String>>,
    /// `inactive["<node>:<user>"]` — set once a user's rate drops to/at the
    /// online threshold and `last_seen` has been frozen to a timestamp.
    inactive: Mutex<std::collections::HashSet<String>>,
    online_threshold_bps: i64,
}

impl DeltaAggregator {
    pub fn new(online_threshold_kbps: i64) -> Self {
        Self {
            expected_absolute: Mutex::new(HashMap::new()),
            seen_nodes: Mutex::new(std::collections::HashSet::new()),
            inactive: Mutex::new(std::collections::HashSet::new()),
            online_threshold_bps: online_threshold_kbps * 1000,
        }
    }

    /// Applies `frame` for `node` and submits the resulting high-priority
    /// store writes through `manager`. `interval_seconds` comes from the
    /// `StreamConfig` this controller sent the node on connect.
    pub async fn ingest(
        &self,
        manager: &StoreManager,
        node: &str,
        frame: &StatsFrame,
        interval_seconds: i32,
        now: NaiveDateTime,
    ) {
        let is_first_frame = {
            let mut seen = self.seen_nodes.lock().unwrap();
            seen.insert(node.to_string())
        };

        let (user_deltas, inbound_deltas) = self.compute_deltas(node, frame);

        if is_first_frame {
            debug!(node, "first frame observed, seeding absolutes only");
        }

        for delta in user_deltas {
            let (delta_up, delta_down) = if is_first_frame {
                (0, 0)
            } else {
                (delta.delta_uplink, delta.delta_downlink)
            };
            let rate = if interval_seconds > 0 {
                (delta_up + delta_down) * 8 / interval_seconds as i64
            } else {
                0
            };

            let last_seen = self.derive_last_seen(node, &delta.subject, rate, now);

            let node_owned = node.to_string();
            let username = delta.subject.clone();
            let sess_up = delta.sess_uplink;
            let sess_down = delta.sess_downlink;
            let now_str = controller_domain::subscription::format_now(now);
            let last_seen_owned = last_seen;

            let result = manager
                .execute_high(move |handle| {
                    let node = node_owned.clone();
                    let username = username.clone();
                    let now_str = now_str.clone();
                    let last_seen_owned = last_seen_owned.clone();
                    async move {
                        handle
                            .apply_user_traffic(
                                &node, &username, delta_up, delta_down, sess_up, sess_down, rate, &now_str,
                            )
                            .await?;
                        if let Some(last_seen) = last_seen_owned {
                            handle.set_last_seen(&node, &username, &last_seen).await?;
                        }
                        Ok(())
                    }
                })
                .await;

            if let Err(err) = result {
                warn!(node, "failed to persist user traffic delta: {err}");
            }
        }

        for delta in inbound_deltas {
            let (delta_up, delta_down) = if is_first_frame {
                (0, 0)
            } else {
                (delta.delta_uplink, delta.delta_downlink)
            };
            let rate = if interval_seconds > 0 {
                (delta_up + delta_down) * 8 / interval_seconds as i64
            } else {
                0
            };

            let node_owned = node.to_string();
            let source = delta.subject.clone();
            let sess_up = delta.sess_uplink;
            let sess_down = delta.sess_downlink;

            let result = manager
                .execute_high(move |handle| {
                    let node = node_owned.clone();
                    let source = source.clone();
                    async move {
                        handle
                            .apply_inbound_traffic(&node, &source, delta_up, delta_down, sess_up, sess_down, rate)
                            .await
                    }
                })
                .await;

            if let Err(err) = result {
                warn!(node, "failed to persist inbound traffic delta: {err}");
            }
        }
    }

    /// Parses `frame`, splits records by tracked class, pairs uplink/downlink
    /// per subject, and computes the delta against `ExpectedAbsolute`.
    /// Always updates `ExpectedAbsolute` regardless of the first-frame guard
    /// (the guard only suppresses the cumulative write, not the bookkeeping).
    fn compute_deltas(&self, node: &str, frame: &StatsFrame) -> (Vec<SubjectDelta>, Vec<SubjectDelta>) {
        let mut user_pending: HashMap<String, PendingCounters> = HashMap::new();
        let mut inbound_pending: HashMap<String, PendingCounters> = HashMap::new();

        for record in &frame.stats {
            let Some([class, subject, direction, _reserved]) = split_stat_name(&record.name) else {
                warn!(node, name = record.name.as_str(), "unparsable stat name, skipping");
                continue;
            };
            if !is_tracked_class(class) {
                continue;
            }
            let Ok(value) = record.value.parse::<i64>() else {
                warn!(node, name = record.name.as_str(), "non-numeric stat value, skipping");
                continue;
            };

            let bucket = match class {
                "user" => user_pending.entry(subject.to_string()).or_default(),
                _ => inbound_pending.entry(subject.to_string()).or_default(),
            };
            match direction {
                "uplink" => bucket.uplink = Some(value),
                "downlink" => bucket.downlink = Some(value),
                other => warn!(node, direction = other, "unknown stat direction, skipping"),
            }
        }

        let mut absolutes = self.expected_absolute.lock().unwrap();
        let node_map = absolutes.entry(node.to_string()).or_default();

        let mut resolve = |pending: HashMap<String, PendingCounters>| -> Vec<SubjectDelta> {
            let mut out = Vec::with_capacity(pending.len());
            for (subject, counters) in pending {
                let sess_uplink = counters.uplink.unwrap_or(0);
                let sess_downlink = counters.downlink.unwrap_or(0);

                let up_key = format!("{subject} uplink");
                let down_key = format!("{subject} downlink");
                let prev_up = *node_map.get(&up_key).unwrap_or(&0);
                let prev_down = *node_map.get(&down_key).unwrap_or(&0);

                let delta_uplink = (sess_uplink - prev_up).max(0);
                let delta_downlink = (sess_downlink - prev_down).max(0);

                node_map.insert(up_key, sess_uplink);
                node_map.insert(down_key, sess_downlink);

                out.push(SubjectDelta {
                    subject,
                    delta_uplink,
                    delta_downlink,
                    sess_uplink,
                    sess_downlink,
                });
            }
            out
        };

        (resolve(user_pending), resolve(inbound_pending))
    }

    /// Applies the `last_seen` online/inactive state machine (§4.3): above
    /// threshold clears the inactive flag and writes `"online"`; a
    /// transition into inactivity freezes `last_seen` to `now`; staying
    /// inactive leaves `last_seen` untouched.
    fn derive_last_seen(&self, node: &str, username: &str, rate_bps: i64, now: NaiveDateTime) -> Option<String> {
        let key = format!("{node}:{username}");
        let mut inactive = self.inactive.lock().unwrap();

        if rate_bps > self.online_threshold_bps {
            inactive.remove(&key);
            Some(LAST_SEEN_ONLINE.to_string())
        } else if inactive.insert(key) {
            Some(controller_domain::subscription::format_minute(now))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller_wire::StatsRecord;

    fn frame(pairs: &[(&str, &str, &str)]) -> StatsFrame {
        StatsFrame {
            stats: pairs
                .iter()
                .map(|(subject, direction, value)| StatsRecord {
                    name: format!("user>>>{subject}>>>{direction}>>>"),
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn first_frame_seeds_absolutes_without_reporting_a_delta() {
        let aggregator = DeltaAggregator::new(0);
        let frame = frame(&[("alice", "uplink", "100"), ("alice", "downlink", "50")]);
        let (user_deltas, _) = aggregator.compute_deltas("A", &frame);

        assert_eq!(user_deltas.len(), 1);
        assert_eq!(user_deltas[0].sess_uplink, 100);
        assert_eq!(user_deltas[0].sess_downlink, 50);
        // First-sight deltas are nonzero from `compute_deltas` alone (it has
        // no notion of "first frame"); `ingest` is what clamps them to 0.
        assert_eq!(user_deltas[0].delta_uplink, 100);
    }

    #[test]
    fn second_frame_computes_a_positive_delta() {
        let aggregator = DeltaAggregator::new(0);
        let first = frame(&[("alice", "uplink", "100"), ("alice", "downlink", "50")]);
        aggregator.compute_deltas("A", &first);

        let second = frame(&[("alice", "uplink", "160"), ("alice", "downlink", "90")]);
        let (user_deltas, _) = aggregator.compute_deltas("A", &second);

        assert_eq!(user_deltas[0].delta_uplink, 60);
        assert_eq!(user_deltas[0].delta_downlink, 40);
        assert_eq!(user_deltas[0].sess_uplink, 160);
    }

    #[test]
    fn disappearing_subject_does_not_produce_a_negative_delta() {
        let aggregator = DeltaAggregator::new(0);
        let first = frame(&[("alice", "uplink", "100"), ("alice", "downlink", "50")]);
        aggregator.compute_deltas("A", &first);

        let second = frame(&[("bob", "uplink", "10"), ("bob", "downlink", "5")]);
        let (user_deltas, _) = aggregator.compute_deltas("A", &second);

        // alice simply does not appear; no negative delta is ever computed
        // for a subject absent from the current frame.
        assert!(user_deltas.iter().all(|d| d.subject == "bob"));
    }

    #[test]
    fn administrative_classes_are_filtered_out() {
        let aggregator = DeltaAggregator::new(0);
        let frame = StatsFrame {
            stats: vec![StatsRecord {
                name: "api>>>something>>>uplink>>>".into(),
                value: "9999".into(),
            }],
        };
        let (user_deltas, inbound_deltas) = aggregator.compute_deltas("A", &frame);
        assert!(user_deltas.is_empty());
        assert!(inbound_deltas.is_empty());
    }
}
