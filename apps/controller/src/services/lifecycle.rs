// [apps/controller/src/services/lifecycle.rs]
//! LifecycleController (§4.6): subscription expiry detection, auto-renew,
//! and enable/disable effectuation. Notification dedup flags are owned here
//! as plain in-memory state — intentionally lost on restart (§4.6
//! Notification dedup) rather than threaded through a global.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use controller_domain::capabilities::{ExternalRoster, NotificationKind, Notifier};
use controller_domain::subscription::{apply_offset, expired, DateOffset};
use controller_store::StoreManager;

use crate::services::effectuation::set_enabled_effectuated;

#[derive(Debug, Clone, Copy, Default)]
struct NotificationFlags {
    notified_expired: bool,
    notified_renewed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleTickSummary {
    pub expired_notifications: u32,
    pub renewals: u32,
    pub disabled: u32,
    pub re_enabled: u32,
}

pub struct LifecycleController {
    flags: Mutex<HashMap<(String, String), NotificationFlags>>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one pass over every user with a non-empty `sub_end` (§4.6). Safe
    /// to call both on the hourly timer and opportunistically right after an
    /// API-driven `adjust_date`.
    pub async fn tick(
        &self,
        manager: &StoreManager,
        notifier: &dyn Notifier,
        roster: &dyn ExternalRoster,
        now: NaiveDateTime,
    ) -> LifecycleTickSummary {
        let mut summary = LifecycleTickSummary::default();

        let users = match manager
            .query_low(|handle| async move { handle.list_users_with_subscription().await })
            .await
        {
            Ok(users) => users,
            Err(err) => {
                warn!("lifecycle tick could not list subscribed users: {err}");
                return summary;
            }
        };

        for user in users {
            let key = (user.node.clone(), user.username.clone());

            if expired(&user.sub_end, now) {
                let already_notified_expired = {
                    let flags = self.flags.lock().unwrap();
                    flags.get(&key).map(|f| f.notified_expired).unwrap_or(false)
                };

                if !already_notified_expired {
                    let detail = format!("sub_end={}", user.sub_end);
                    match notifier
                        .notify(NotificationKind::SubscriptionExpired, &user.node, &user.username, &detail)
                        .await
                    {
                        Ok(()) => {
                            self.flags.lock().unwrap().entry(key.clone()).or_default().notified_expired = true;
                            summary.expired_notifications += 1;
                        }
                        Err(err) => warn!(node = user.node, username = user.username, "expiry notification failed: {err}"),
                    }
                }

                if user.renew_days >= 1 {
                    let new_sub_end = apply_offset(
                        now,
                        DateOffset {
                            negative: false,
                            days: user.renew_days,
                            hours: 0,
                        },
                    );

                    let node_owned = user.node.clone();
                    let username_owned = user.username.clone();
                    let new_sub_end_owned = new_sub_end.clone();
                    let write = manager
                        .execute_high(move |handle| {
                            let node = node_owned.clone();
                            let username = username_owned.clone();
                            let new_sub_end = new_sub_end_owned.clone();
                            async move { handle.set_sub_end(&node, &username, &new_sub_end).await }
                        })
                        .await;

                    if let Err(err) = write {
                        warn!(node = user.node, username = user.username, "auto-renew write failed: {err}");
                        continue;
                    }

                    let detail = format!("new sub_end={new_sub_end}");
                    if let Err(err) = notifier
                        .notify(NotificationKind::SubscriptionRenewed, &user.node, &user.username, &detail)
                        .await
                    {
                        warn!(node = user.node, username = user.username, "renewal notification failed: {err}");
                    }
                    self.flags.lock().unwrap().remove(&key);
                    summary.renewals += 1;

                    if !user.enabled {
                        if let Err(err) =
                            set_enabled_effectuated(manager, roster, &user.node, &user.username, true, true).await
                        {
                            warn!(node = user.node, username = user.username, "re-enable after renewal failed: {err}");
                        } else {
                            summary.re_enabled += 1;
                        }
                    }
                } else if user.enabled {
                    if let Err(err) =
                        set_enabled_effectuated(manager, roster, &user.node, &user.username, false, true).await
                    {
                        warn!(node = user.node, username = user.username, "disable on expiry failed: {err}");
                    } else {
                        summary.disabled += 1;
                    }
                }
            } else if !user.enabled {
                if let Err(err) = set_enabled_effectuated(manager, roster, &user.node, &user.username, true, true).await {
                    warn!(node = user.node, username = user.username, "re-enable on active subscription failed: {err}");
                } else {
                    self.flags.lock().unwrap().remove(&key);
                    summary.re_enabled += 1;
                }
            }
        }

        info!(
            expired_notifications = summary.expired_notifications,
            renewals = summary.renewals,
            disabled = summary.disabled,
            re_enabled = summary.re_enabled,
            "lifecycle tick complete"
        );
        summary
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as SyncMutex;

    use async_trait::async_trait;
    use controller_domain::capabilities::RosterMutation;
    use controller_store::{open_hot_database, StoreHandle, StoreManager, StoreManagerConfig};

    use super::*;

    struct RecordingNotifier {
        kinds: SyncMutex<Vec<NotificationKind>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                kinds: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            kind: NotificationKind,
            _node: &str,
            _username: &str,
            _detail: &str,
        ) -> Result<(), controller_domain::capabilities::CapabilityError> {
            self.kinds.lock().unwrap().push(kind);
            Ok(())
        }
    }

    struct RecordingRoster {
        mutations: SyncMutex<Vec<RosterMutation>>,
    }

    impl RecordingRoster {
        fn new() -> Self {
            Self {
                mutations: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExternalRoster for RecordingRoster {
        async fn apply(
            &self,
            _node: &str,
            _username: &str,
            mutation: RosterMutation,
            _hot_restart: bool,
        ) -> Result<(), controller_domain::capabilities::CapabilityError> {
            self.mutations.lock().unwrap().push(mutation);
            Ok(())
        }
    }

    async fn spawn_test_manager() -> StoreManager {
        let (_db, conn) = open_hot_database().await.expect("open hot database");
        StoreManager::spawn(StoreHandle::new(conn), StoreManagerConfig::default())
    }

    fn parse(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d-%H").unwrap()
    }

    #[tokio::test]
    async fn an_expired_user_with_renew_days_is_renewed_re_enabled_and_notified_once() {
        let manager = spawn_test_manager().await;
        manager
            .execute_high(|handle| async move {
                handle.insert_new_user("A", "alice", false, "2023-12-01-00").await?;
                handle.set_sub_end("A", "alice", "2024-01-01-00").await?;
                handle.set_renew_days("A", "alice", 30).await?;
                Ok(())
            })
            .await
            .unwrap();

        let notifier = RecordingNotifier::new();
        let roster = RecordingRoster::new();
        let controller = LifecycleController::new();
        let now = parse("2024-01-02-00");

        let summary = controller.tick(&manager, &notifier, &roster, now).await;

        assert_eq!(summary.expired_notifications, 1);
        assert_eq!(summary.renewals, 1);
        assert_eq!(summary.re_enabled, 1);

        let kinds = notifier.kinds.lock().unwrap();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0], NotificationKind::SubscriptionExpired);
        assert_eq!(kinds[1], NotificationKind::SubscriptionRenewed);

        assert_eq!(*roster.mutations.lock().unwrap(), vec![RosterMutation::Enable]);

        let user = manager
            .query_low(|handle| async move { handle.get_user("A", "alice").await })
            .await
            .unwrap()
            .expect("user still present");
        assert_eq!(user.sub_end, "2024-02-01-00");
        assert!(user.enabled);

        // A second tick at the same instant must not re-send the expiry
        // notification: the flag was only set (and then cleared again by the
        // renewal) during the first pass, and the user is no longer expired.
        let summary = controller.tick(&manager, &notifier, &roster, now).await;
        assert_eq!(summary.expired_notifications, 0);
        assert_eq!(summary.renewals, 0);
        assert_eq!(notifier.kinds.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn an_expired_user_with_no_renew_days_is_disabled_and_notified_once() {
        let manager = spawn_test_manager().await;
        manager
            .execute_high(|handle| async move {
                handle.insert_new_user("A", "bob", true, "2023-12-01-00").await?;
                handle.set_sub_end("A", "bob", "2024-01-01-00").await?;
                Ok(())
            })
            .await
            .unwrap();

        let notifier = RecordingNotifier::new();
        let roster = RecordingRoster::new();
        let controller = LifecycleController::new();
        let now = parse("2024-01-02-00");

        let summary = controller.tick(&manager, &notifier, &roster, now).await;
        assert_eq!(summary.expired_notifications, 1);
        assert_eq!(summary.disabled, 1);
        assert_eq!(*roster.mutations.lock().unwrap(), vec![RosterMutation::Disable]);

        let summary = controller.tick(&manager, &notifier, &roster, now).await;
        assert_eq!(summary.expired_notifications, 0, "dedup flag must suppress a repeat notification");
    }
}
