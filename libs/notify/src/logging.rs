//! Fallback `Notifier` for local development and for nodes that have not
//! configured a Telegram webhook: every alert is simply logged at `warn!`
//! instead of being dropped.

use async_trait::async_trait;

use controller_domain::capabilities::{CapabilityError, NotificationKind, Notifier};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        node: &str,
        username: &str,
        detail: &str,
    ) -> Result<(), CapabilityError> {
        tracing::warn!(
            node,
            username,
            kind = ?kind,
            detail,
            "📣 [NOTIFY_FALLBACK]: no Telegram webhook configured, logging alert instead"
        );
        Ok(())
    }
}
