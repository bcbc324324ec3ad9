// [apps/controller/src/services/multiplexer.rs]
//! StreamMultiplexer (§4.2): one persistent bidi stream per configured
//! node, reconnect/backoff, and a bounded worker pool that fans out
//! received frames to the aggregation/reconciliation services. Per-node
//! connection state lives entirely inside that node's own task — there is
//! no shared "connection registry" for other tasks to reach into, which is
//! how the spec's "must not be observable in Disconnected" requirement is
//! satisfied without an explicit lock object.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use controller_domain::capabilities::Clock;
use controller_domain::Node;
use controller_node_link::NodeConnection;
use controller_store::StoreManager;
use controller_wire::{ClientFrame, ListUsersRequest, ServerFrame, StreamConfig};

use crate::services::aggregator::DeltaAggregator;
use crate::services::ip_store::IpStore;
use crate::services::roster_reconciler::RosterReconciler;

const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const ROSTER_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Send-timeout for handing a received frame to the worker pool (§5
/// Backpressure). A frame that can't be enqueued within this window is
/// dropped rather than stalling the node's own stream task — the next
/// frame from that node re-seeds `ExpectedAbsolute` naturally.
const TASK_DISPATCH_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// One frame received from one node, queued for the worker pool.
pub struct StreamTask {
    pub node: String,
    pub frame: ServerFrame,
}

/// Worker pool size per §4.2: `clamp(4, nodes/10, 2*cores)`.
pub fn worker_pool_size(node_count: usize, cores: usize) -> usize {
    let lower = 4;
    let upper = 2 * cores.max(1);
    let target = node_count / 10;
    target.clamp(lower, upper.max(lower))
}

pub struct StreamMultiplexer {
    interval_seconds: i32,
    task_tx: mpsc::Sender<StreamTask>,
    cancel_tx: watch::Sender<bool>,
}

impl StreamMultiplexer {
    /// `interval_seconds` is what the controller tells every node via its
    /// initial `StreamConfig` frame. `task_channel_capacity` should be
    /// `2 * nodes` per §5's backpressure policy.
    pub fn new(interval_seconds: i32, task_channel_capacity: usize) -> (Self, mpsc::Receiver<StreamTask>) {
        let (task_tx, task_rx) = mpsc::channel(task_channel_capacity);
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        (
            Self {
                interval_seconds,
                task_tx,
                cancel_tx,
            },
            task_rx,
        )
    }

    /// Spawns one persistent-connection task per node. Each task dials,
    /// handshakes, and loops receiving frames until cancellation.
    pub fn spawn_all(&self, nodes: Vec<Node>) -> Vec<tokio::task::JoinHandle<()>> {
        nodes
            .into_iter()
            .map(|node| {
                let task_tx = self.task_tx.clone();
                let cancel_rx = self.cancel_tx.subscribe();
                let interval_seconds = self.interval_seconds;
                tokio::spawn(run_node_stream(node, task_tx, cancel_rx, interval_seconds))
            })
            .collect()
    }

    /// Spawns the bounded worker pool draining `task_rx` and dispatching
    /// each frame to its handler.
    pub fn spawn_workers(
        worker_count: usize,
        task_rx: mpsc::Receiver<StreamTask>,
        manager: StoreManager,
        aggregator: Arc<DeltaAggregator>,
        ip_store: Arc<IpStore>,
        clock: Arc<dyn Clock>,
        interval_seconds: i32,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let shared_rx = Arc::new(AsyncMutex::new(task_rx));
        (0..worker_count)
            .map(|worker_id| {
                let shared_rx = shared_rx.clone();
                let manager = manager.clone();
                let aggregator = aggregator.clone();
                let ip_store = ip_store.clone();
                let clock = clock.clone();
                tokio::spawn(async move {
                    debug!(worker_id, "stream worker online");
                    loop {
                        let task = {
                            let mut guard = shared_rx.lock().await;
                            guard.recv().await
                        };
                        match task {
                            Some(task) => {
                                dispatch(task, &manager, &aggregator, &ip_store, clock.as_ref(), interval_seconds).await
                            }
                            None => break,
                        }
                    }
                    debug!(worker_id, "stream worker exiting");
                })
            })
            .collect()
    }

    /// Signals every node task and worker's shared channel to wind down.
    /// Workers exit on their own once the task channel closes behind them.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

async fn dispatch(
    task: StreamTask,
    manager: &StoreManager,
    aggregator: &DeltaAggregator,
    ip_store: &IpStore,
    clock: &dyn Clock,
    interval_seconds: i32,
) {
    match task.frame {
        ServerFrame::Stats(frame) => {
            aggregator.ingest(manager, &task.node, &frame, interval_seconds, clock.now()).await;
        }
        ServerFrame::Users(frame) => {
            RosterReconciler::reconcile(manager, &task.node, frame, clock.now()).await;
        }
        ServerFrame::LogData(frame) => {
            for (username, log_data) in frame.user_log_data {
                ip_store.add_ips(&task.node, &username, &log_data.valid_ips);

                for (domain, count) in log_data.dns_stats {
                    let node = task.node.clone();
                    let username = username.clone();
                    let result = manager
                        .execute_high(move |handle| {
                            let node = node.clone();
                            let username = username.clone();
                            let domain = domain.clone();
                            async move { handle.increment_dns(&node, &username, &domain, count).await }
                        })
                        .await;
                    if let Err(err) = result {
                        warn!(node = task.node, username, "failed to persist DNS stat: {err}");
                    }
                }
            }
        }
    }
}

/// Per-node connection lifecycle: `Disconnected -> Connecting -> Connected
/// -> (Error | Disconnected)`. Reconnects on a 30s timer; refreshes the
/// roster every 60 minutes while connected.
async fn run_node_stream(
    node: Node,
    task_tx: mpsc::Sender<StreamTask>,
    mut cancel_rx: watch::Receiver<bool>,
    interval_seconds: i32,
) {
    loop {
        if *cancel_rx.borrow() {
            info!(node = node.name, "stream task cancelled before dial");
            return;
        }

        info!(node = node.name, "dialing node stream");
        let mut connection = match NodeConnection::dial(&node).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(node = node.name, "dial failed, retrying in {:?}: {err}", CONNECTION_CHECK_INTERVAL);
                if wait_or_cancel(CONNECTION_CHECK_INTERVAL, &mut cancel_rx).await {
                    return;
                }
                continue;
            }
        };

        if let Err(err) = connection
            .send(&ClientFrame::StreamConfig(StreamConfig { interval_seconds }))
            .await
        {
            warn!(node = node.name, "failed to send initial StreamConfig: {err}");
            continue;
        }
        if let Err(err) = connection.send(&ClientFrame::ListUsersRequest(ListUsersRequest {})).await {
            warn!(node = node.name, "failed to send initial ListUsersRequest: {err}");
            continue;
        }

        info!(node = node.name, "node stream connected");
        let mut roster_refresh = tokio::time::interval(ROSTER_REFRESH_INTERVAL);
        roster_refresh.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;

                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        info!(node = node.name, "stream task cancelled, closing connection");
                        connection.close().await;
                        return;
                    }
                }

                _ = roster_refresh.tick() => {
                    if let Err(err) = connection.send(&ClientFrame::ListUsersRequest(ListUsersRequest {})).await {
                        warn!(node = node.name, "roster-refresh send failed: {err}");
                        break;
                    }
                }

                received = connection.recv() => {
                    match received {
                        Ok(Some(frame)) => {
                            let task = StreamTask { node: node.name.clone(), frame };
                            match tokio::time::timeout(TASK_DISPATCH_SEND_TIMEOUT, task_tx.send(task)).await {
                                Ok(Ok(())) => {}
                                Ok(Err(_)) => {
                                    info!(node = node.name, "task channel closed, stopping stream task");
                                    return;
                                }
                                Err(_) => {
                                    error!(node = node.name, "worker pool saturated, dropping frame after {:?}", TASK_DISPATCH_SEND_TIMEOUT);
                                }
                            }
                        }
                        Ok(None) => {
                            warn!(node = node.name, "node closed the stream, reconnecting");
                            break;
                        }
                        Err(err) => {
                            error!(node = node.name, "stream transport error, reconnecting: {err}");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Sleeps for `duration` unless cancellation fires first, in which case it
/// returns `true` so the caller can stop retrying.
async fn wait_or_cancel(duration: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel_rx.changed() => *cancel_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_pool_size_respects_the_floor_and_ceiling() {
        assert_eq!(worker_pool_size(0, 8), 4);
        assert_eq!(worker_pool_size(500, 2), 4);
        assert_eq!(worker_pool_size(500, 64), 50);
    }
}
