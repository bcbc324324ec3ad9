// [apps/controller/src/services/roster_adapter.rs]
//! `ShadowListRoster`: the `ExternalRoster` capability implementation this
//! repository actually ships (§1, §4.7, §9 REDESIGN FLAGS). It does not
//! reach into a node's live Xray/Singbox configuration — that stays the
//! node agent's own concern — it only maintains the `.disabled_users`
//! shadow-list file the spec names as the boundary, and logs a hot-restart
//! signal for the operator's out-of-band tooling to act on.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use controller_domain::capabilities::{CapabilityError, ExternalRoster, RosterMutation};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DisabledUsersFile {
    /// `node -> currently-disabled usernames`.
    disabled: HashMap<String, HashSet<String>>,
}

pub struct ShadowListRoster {
    path: PathBuf,
    state: Mutex<HashMap<String, HashSet<String>>>,
}

impl ShadowListRoster {
    /// Loads `path` if it already exists, starting from an empty shadow
    /// list otherwise (first run).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<DisabledUsersFile>(&raw).ok())
            .map(|file| file.disabled)
            .unwrap_or_default();

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn persist(&self) -> Result<(), CapabilityError> {
        let guard = self.state.lock().unwrap();
        let file = DisabledUsersFile {
            disabled: guard.clone(),
        };
        let rendered = serde_json::to_string_pretty(&file)
            .map_err(|err| CapabilityError::RosterRejected(format!("failed to serialize shadow list: {err}")))?;
        std::fs::write(&self.path, rendered)
            .map_err(|err| CapabilityError::RosterRejected(format!("failed to write shadow list: {err}")))
    }
}

#[async_trait]
impl ExternalRoster for ShadowListRoster {
    async fn apply(
        &self,
        node: &str,
        username: &str,
        mutation: RosterMutation,
        hot_restart: bool,
    ) -> Result<(), CapabilityError> {
        {
            let mut guard = self.state.lock().unwrap();
            let node_set = guard.entry(node.to_string()).or_default();

            match mutation {
                RosterMutation::Disable => {
                    if !node_set.insert(username.to_string()) {
                        return Err(CapabilityError::RosterRejected(format!(
                            "user {username} is already in {node}'s disabled shadow list"
                        )));
                    }
                }
                RosterMutation::Enable => {
                    if !node_set.remove(username) {
                        return Err(CapabilityError::RosterRejected(format!(
                            "user {username} is not present in {node}'s disabled shadow list"
                        )));
                    }
                }
            }
        }

        self.persist()?;

        if hot_restart {
            info!(node, username, "🔁 [ROSTER_ADAPTER]: hot-restart requested after shadow-list mutation");
        } else {
            warn!(node, username, "roster mutation applied without a hot-restart signal");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn disabling_twice_without_an_enable_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let roster = ShadowListRoster::load(file.path());

        roster.apply("A", "alice", RosterMutation::Disable, true).await.unwrap();
        let err = roster.apply("A", "alice", RosterMutation::Disable, true).await.unwrap_err();
        assert!(matches!(err, CapabilityError::RosterRejected(_)));
    }

    #[tokio::test]
    async fn enabling_a_user_not_on_the_shadow_list_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let roster = ShadowListRoster::load(file.path());

        let err = roster.apply("A", "alice", RosterMutation::Enable, true).await.unwrap_err();
        assert!(matches!(err, CapabilityError::RosterRejected(_)));
    }

    #[tokio::test]
    async fn disable_then_enable_round_trips() {
        let file = NamedTempFile::new().unwrap();
        let roster = ShadowListRoster::load(file.path());

        roster.apply("A", "alice", RosterMutation::Disable, true).await.unwrap();
        roster.apply("A", "alice", RosterMutation::Enable, true).await.unwrap();

        let reloaded = ShadowListRoster::load(file.path());
        assert!(reloaded.state.lock().unwrap().get("A").map(|s| s.is_empty()).unwrap_or(true));
    }
}
