//! Capability abstractions over outbound side-effects (§9 REDESIGN FLAGS).
//!
//! The core never talks to Telegram, a filesystem shadow-list, or the wall
//! clock directly; it depends on these traits so that the StoreManager,
//! LifecycleController, and test code can all be exercised against fakes.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("notification delivery failed: {0}")]
    NotifyFailed(String),
    #[error("external roster mutation rejected: {0}")]
    RosterRejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    SubscriptionExpired,
    SubscriptionRenewed,
    ServiceHealthAlert,
}

/// Outbound alerting, modeled as a capability so the lifecycle control flow
/// stays decoupled from the Telegram webhook implementation in `notify`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        kind: NotificationKind,
        node: &str,
        username: &str,
        detail: &str,
    ) -> Result<(), CapabilityError>;
}

/// The mutation `LifecycleController::enable`/`disable` (§4.7) asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterMutation {
    Enable,
    Disable,
}

/// The node's live roster surface: moves a user between the active inbound
/// list and the `.disabled_users` shadow list, optionally requesting a
/// hot-restart of the node's proxy core afterward.
#[async_trait]
pub trait ExternalRoster: Send + Sync {
    async fn apply(
        &self,
        node: &str,
        username: &str,
        mutation: RosterMutation,
        hot_restart: bool,
    ) -> Result<(), CapabilityError>;
}

/// Abstraction over wall-clock reads so lifecycle and TTL logic can be
/// driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}
