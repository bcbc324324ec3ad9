// [apps/controller/src/services/roster_reconciler.rs]
//! RosterReconciler (§4.4): diffs a node's authoritative `UsersFrame` against
//! the store, upserting users/bindings and hard-deleting whatever the node
//! no longer reports. Runs as a single high-priority transaction per node so
//! a failed reconciliation leaves the prior state untouched (§4.4 Failure).

use chrono::NaiveDateTime;
use tracing::{info, warn};

use controller_domain::subscription::format_now;
use controller_store::{StoreError, StoreManager};
use controller_wire::UsersFrame;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOutcome {
    pub added_users: u32,
    pub deleted_users: u32,
}

pub struct RosterReconciler;

impl RosterReconciler {
    /// Applies `frame` for `node` through `manager`. Idempotent: reapplying
    /// the same frame after a successful run reports zero added/deleted.
    pub async fn reconcile(manager: &StoreManager, node: &str, frame: UsersFrame, now: NaiveDateTime) {
        let node_owned = node.to_string();
        let now_str = format_now(now);

        let result = manager
            .execute_high(move |handle| {
                let node = node_owned.clone();
                let frame = frame.clone();
                let now_str = now_str.clone();
                async move {
                    handle.begin().await?;
                    match Self::apply(&handle, &node, &frame, &now_str).await {
                        Ok(outcome) => {
                            handle.commit().await?;
                            info!(
                                node,
                                added = outcome.added_users,
                                deleted = outcome.deleted_users,
                                "roster reconciled"
                            );
                            Ok(())
                        }
                        Err(err) => {
                            let _ = handle.rollback().await;
                            Err(err)
                        }
                    }
                }
            })
            .await;

        if let Err(err) = result {
            warn!(node, "roster reconciliation failed, retrying next tick: {err}");
        }
    }

    async fn apply(
        handle: &controller_store::StoreHandle,
        node: &str,
        frame: &UsersFrame,
        now_str: &str,
    ) -> Result<ReconcileOutcome, StoreError> {
        let mut outcome = ReconcileOutcome::default();
        let mut seen_usernames = Vec::with_capacity(frame.users.len());

        for user in &frame.users {
            seen_usernames.push(user.username.clone());

            if handle.user_exists(node, &user.username).await? {
                handle.set_enabled(node, &user.username, user.enabled).await?;
            } else {
                handle.insert_new_user(node, &user.username, user.enabled, now_str).await?;
                outcome.added_users += 1;
            }

            for binding in &user.bindings {
                handle
                    .insert_binding(node, &user.username, &binding.credential, &binding.inbound_tag)
                    .await?;
            }
        }

        let stored_usernames = handle.list_usernames_for_node(node).await?;
        for username in stored_usernames {
            if !seen_usernames.contains(&username) {
                handle.delete_user(node, &username).await?;
                outcome.deleted_users += 1;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller_store::{open_hot_database, StoreHandle, StoreManagerConfig};
    use controller_wire::{UserBinding, UserRecord};

    async fn test_manager() -> StoreManager {
        let (_db, conn) = open_hot_database().await.unwrap();
        StoreManager::spawn(StoreHandle::new(conn), StoreManagerConfig::default())
    }

    fn users_frame(entries: &[(&str, bool)]) -> UsersFrame {
        UsersFrame {
            users: entries
                .iter()
                .map(|(username, enabled)| UserRecord {
                    username: username.to_string(),
                    enabled: *enabled,
                    bindings: vec![UserBinding {
                        credential: format!("{username}-cred"),
                        inbound_tag: "vless-in".to_string(),
                    }],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn deletes_users_missing_from_a_later_frame() {
        let manager = test_manager().await;
        let now = NaiveDateTime::parse_from_str("2024-01-01-00", "%Y-%m-%d-%H").unwrap();

        RosterReconciler::reconcile(&manager, "A", users_frame(&[("alice", true), ("bob", true)]), now).await;
        RosterReconciler::reconcile(&manager, "A", users_frame(&[("alice", true)]), now).await;

        let remaining = manager
            .query_low(|handle| async move { handle.list_usernames_for_node("A").await })
            .await
            .unwrap();
        assert_eq!(remaining, vec!["alice".to_string()]);
        manager.close().await;
    }

    #[tokio::test]
    async fn reapplying_the_same_frame_is_idempotent() {
        let manager = test_manager().await;
        let now = NaiveDateTime::parse_from_str("2024-01-01-00", "%Y-%m-%d-%H").unwrap();
        let frame = users_frame(&[("alice", true)]);

        RosterReconciler::reconcile(&manager, "A", frame.clone(), now).await;
        RosterReconciler::reconcile(&manager, "A", frame, now).await;

        manager.close().await;
    }
}
