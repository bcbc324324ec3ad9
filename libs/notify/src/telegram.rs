// [libs/notify/src/telegram.rs]
/*!
 * =================================================================
 * APARATO: TELEGRAM ALERT RELAY (V1.0)
 * CLASIFICACIÓN: OUTBOUND NOTIFICATION CAPABILITY
 * RESPONSABILIDAD: ENTREGA DE ALERTAS DE SUSCRIPCIÓN Y SALUD DE SERVICIO
 *                  HACIA UN WEBHOOK DE TELEGRAM BOT API.
 * =================================================================
 */

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use controller_domain::capabilities::{CapabilityError, NotificationKind, Notifier};

/// Telegram Bot API `sendMessage` timeout. Alerts are best-effort; a slow
/// webhook must never stall the lifecycle control loop that triggered it.
const TELEGRAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

/// Sends `Notifier` alerts to a Telegram chat via a bot webhook URL, e.g.
/// `https://api.telegram.org/bot<token>/sendMessage`.
pub struct TelegramNotifier {
    client: Client,
    webhook_url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(webhook_url: impl Into<String>, chat_id: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(TELEGRAM_REQUEST_TIMEOUT)
            .user_agent("proxy-fleet-controller/notify")
            .build()
            .expect("FATAL: failed to build the Telegram uplink client");

        Self {
            client,
            webhook_url: webhook_url.into(),
            chat_id: chat_id.into(),
        }
    }

    fn format_message(kind: NotificationKind, node: &str, username: &str, detail: &str) -> String {
        let headline = match kind {
            NotificationKind::SubscriptionExpired => "⛔ Subscription expired",
            NotificationKind::SubscriptionRenewed => "✅ Subscription renewed",
            NotificationKind::ServiceHealthAlert => "🚨 Service health alert",
        };
        format!("{headline}\nnode: {node}\nuser: {username}\n{detail}")
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        node: &str,
        username: &str,
        detail: &str,
    ) -> Result<(), CapabilityError> {
        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: Self::format_message(kind, node, username, detail),
            parse_mode: "HTML",
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                warn!("❌ [TELEGRAM_UPLINK]: request failed: {err}");
                CapabilityError::NotifyFailed(err.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(node, username, "📨 [TELEGRAM_UPLINK]: alert delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!("⚠️ [TELEGRAM_REJECTION]: status {status}, body: {body}");
        Err(CapabilityError::NotifyFailed(format!(
            "telegram webhook rejected delivery: {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_headline_per_kind() {
        let msg = TelegramNotifier::format_message(
            NotificationKind::SubscriptionExpired,
            "node-a",
            "alice",
            "sub_end 2026-01-01-00",
        );
        assert!(msg.contains("expired"));
        assert!(msg.contains("node-a"));
        assert!(msg.contains("alice"));
    }
}
