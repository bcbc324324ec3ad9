// [apps/controller/src/services/persistence_scheduler.rs]
//! PersistenceScheduler (§4.8): one hourly timer drives, in order, stale
//! inbound-tag cleanup, a LifecycleController pass, and a hot→cold
//! snapshot. Each step is independent — a failure in one is logged and
//! does not block the next.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use controller_domain::capabilities::{Clock, ExternalRoster, Notifier};
use controller_store::StoreManager;

use crate::services::lifecycle::LifecycleController;

pub struct PersistenceScheduler {
    cadence: Duration,
    cold_store_path: String,
}

impl PersistenceScheduler {
    pub fn new(cadence: Duration, cold_store_path: impl Into<String>) -> Self {
        Self {
            cadence,
            cold_store_path: cold_store_path.into(),
        }
    }

    /// Spawns the scheduler's perpetual loop. The loop owns no cancellation
    /// token of its own; it is simply aborted along with the rest of the
    /// task set on the controller-wide cancellation signal (§5).
    pub fn spawn(
        self: Arc<Self>,
        manager: StoreManager,
        lifecycle: Arc<LifecycleController>,
        notifier: Arc<dyn Notifier>,
        roster: Arc<dyn ExternalRoster>,
        clock: Arc<dyn Clock>,
        node_names: Vec<String>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("🗄️  [PERSISTENCE_SCHEDULER]: online, cadence={:?}", self.cadence);
            loop {
                tokio::time::sleep(self.cadence).await;
                self.run_once(&manager, &lifecycle, notifier.as_ref(), roster.as_ref(), clock.as_ref(), &node_names)
                    .await;
            }
        })
    }

    pub async fn run_once(
        &self,
        manager: &StoreManager,
        lifecycle: &LifecycleController,
        notifier: &dyn Notifier,
        roster: &dyn ExternalRoster,
        clock: &dyn Clock,
        node_names: &[String],
    ) {
        for node in node_names {
            if let Err(err) = self.clean_stale_inbound(manager, node).await {
                error!(node, "expired-tag cleanup failed: {err}");
            }
        }

        lifecycle.tick(manager, notifier, roster, clock.now()).await;

        if let Err(err) = self.snapshot(manager).await {
            error!("hot-to-cold snapshot failed: {err}");
        }
    }

    async fn clean_stale_inbound(&self, manager: &StoreManager, node: &str) -> Result<(), controller_store::StoreError> {
        let node_owned = node.to_string();
        let keep = manager
            .query_low(move |handle| {
                let node = node_owned.clone();
                async move {
                    let bindings = handle.bindings_for_node(&node).await?;
                    Ok(bindings.into_iter().map(|b| b.inbound_tag).collect::<Vec<_>>())
                }
            })
            .await?;

        let node_owned = node.to_string();
        manager
            .execute_high(move |handle| {
                let node = node_owned.clone();
                let keep = keep.clone();
                async move { handle.delete_inbound_not_in(&node, &keep).await }
            })
            .await
    }

    async fn snapshot(&self, manager: &StoreManager) -> Result<(), controller_store::StoreError> {
        let cold_store_path = self.cold_store_path.clone();
        manager
            .execute_high(move |handle| {
                let cold_store_path = cold_store_path.clone();
                async move { controller_store::snapshot_hot_to_cold(handle.connection(), &cold_store_path).await }
            })
            .await
    }
}
