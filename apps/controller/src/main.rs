// [apps/controller/src/main.rs]
//! Composition root (§5): loads configuration, opens the hot store, wires
//! every capability and background service, serves the HTTP API, and on
//! shutdown drains the store and takes one final cold snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use controller_domain::capabilities::{Clock, ExternalRoster, Notifier, SystemClock};
use controller_domain::node::{CoreKind, Node};
use controller_notify::{LoggingNotifier, TelegramNotifier};
use controller_store::{load_cold_into_hot, open_hot_database, snapshot_hot_to_cold, StoreHandle, StoreManager};

use proxy_fleet_controller::config::{Config, NodeConfig};
use proxy_fleet_controller::http::{build_router, AppState};
use proxy_fleet_controller::services::aggregator::DeltaAggregator;
use proxy_fleet_controller::services::ip_store::IpStore;
use proxy_fleet_controller::services::lifecycle::LifecycleController;
use proxy_fleet_controller::services::multiplexer::{worker_pool_size, StreamMultiplexer};
use proxy_fleet_controller::services::persistence_scheduler::PersistenceScheduler;
use proxy_fleet_controller::services::roster_adapter::ShadowListRoster;

fn node_from_config(config: &NodeConfig) -> Node {
    Node {
        name: config.name.clone(),
        endpoint: config.endpoint.clone(),
        core_kind: match config.core_kind {
            CoreKind::Xray => CoreKind::Xray,
            CoreKind::Singbox => CoreKind::Singbox,
        },
        tls_cert_path: config.tls_cert_path.clone(),
        tls_key_path: config.tls_key_path.clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    controller_observability::init_tracing("proxy_fleet_controller");

    let config = Config::load()?;
    let nodes: Vec<Node> = config.nodes.iter().map(node_from_config).collect();
    let node_names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();

    let (db, conn) = open_hot_database().await?;
    let shutdown_conn = conn.clone();

    match load_cold_into_hot(&conn, &config.cold_store_path).await {
        Ok(true) => info!("restored hot store from cold snapshot"),
        Ok(false) => info!("starting with an empty hot store"),
        Err(err) => warn!("failed to load cold snapshot, starting empty: {err}"),
    }

    let manager = StoreManager::spawn(StoreHandle::new(conn), config.store.to_manager_config());

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => Arc::new(TelegramNotifier::new(telegram.webhook_url.clone(), telegram.chat_id.clone())),
        None => Arc::new(LoggingNotifier),
    };
    let roster: Arc<dyn ExternalRoster> = Arc::new(ShadowListRoster::load(&config.disabled_users_path));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lifecycle = Arc::new(LifecycleController::new());
    let aggregator = Arc::new(DeltaAggregator::new(config.online_threshold_kbps));
    let ip_store = Arc::new(IpStore::new(Duration::from_secs(config.ip_ttl_seconds)));

    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let worker_count = worker_pool_size(nodes.len(), cores);
    let task_channel_capacity = (2 * nodes.len()).max(1);

    let (multiplexer, task_rx) = StreamMultiplexer::new(config.stream_interval_seconds, task_channel_capacity);
    let stream_handles = multiplexer.spawn_all(nodes.clone());
    let worker_handles = StreamMultiplexer::spawn_workers(
        worker_count,
        task_rx,
        manager.clone(),
        aggregator.clone(),
        ip_store.clone(),
        clock.clone(),
        config.stream_interval_seconds,
    );

    let persistence_scheduler = Arc::new(PersistenceScheduler::new(
        Duration::from_secs(config.lifecycle_cadence_seconds),
        config.cold_store_path.clone(),
    ));
    let persistence_handle = persistence_scheduler.clone().spawn(
        manager.clone(),
        lifecycle.clone(),
        notifier.clone(),
        roster.clone(),
        clock.clone(),
        node_names.clone(),
    );

    let ip_flush_handle = {
        let manager = manager.clone();
        let ip_store = ip_store.clone();
        let interval = Duration::from_secs(config.ip_flush_interval_seconds);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                ip_store.flush(&manager).await;
            }
        })
    };

    let state = AppState {
        manager: manager.clone(),
        lifecycle: lifecycle.clone(),
        roster: roster.clone(),
        notifier: notifier.clone(),
        clock: clock.clone(),
        bearer_token: Arc::new(config.http.bearer_token.clone()),
        known_nodes: Arc::new(node_names.clone()),
    };
    let router = build_router(state);
    let listener = TcpListener::bind(&config.http.bind_address).await?;
    info!(address = config.http.bind_address, "HTTP API listening");

    let serve_result = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await;
    if let Err(err) = serve_result {
        error!("HTTP server exited with an error: {err}");
    }

    info!("shutdown signal received, draining background work");
    multiplexer.cancel();
    persistence_handle.abort();
    ip_flush_handle.abort();

    for handle in stream_handles.into_iter().chain(worker_handles) {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!("a background task did not join within the shutdown budget");
        }
    }

    ip_store.flush(&manager).await;
    manager.close().await;

    if let Err(err) = snapshot_hot_to_cold(&shutdown_conn, &config.cold_store_path).await {
        error!("final shutdown snapshot failed: {err}");
    }
    drop(db);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install the Ctrl+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install the SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
