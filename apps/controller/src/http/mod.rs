//! The HTTP control API (§6): a thin REST surface over the same
//! `StoreManager` the background services write through, plus the
//! `LifecycleController`/`ExternalRoster` capabilities an operator action
//! needs to trigger synchronously (enable/disable, adjust_date).

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use controller_domain::capabilities::{Clock, ExternalRoster, Notifier};
use controller_store::StoreManager;

use crate::services::lifecycle::LifecycleController;

/// Everything an HTTP handler needs to reach. Cheap to clone: every field is
/// either already `Clone` (`StoreManager`) or behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub manager: StoreManager,
    pub lifecycle: Arc<LifecycleController>,
    pub roster: Arc<dyn ExternalRoster>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub bearer_token: Arc<String>,
    pub known_nodes: Arc<Vec<String>>,
}

/// Assembles the full router: `/health` is reachable without a token, every
/// `/api/v1/*` route sits behind `require_bearer_token`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/users", get(handlers::ControllerApi::list_users))
        .route("/stats", get(handlers::ControllerApi::composite_stats))
        .route("/dns_stats", get(handlers::ControllerApi::dns_stats))
        .route("/add_user", post(handlers::ControllerApi::add_user))
        .route("/bulk_add_users", post(handlers::ControllerApi::bulk_add_users))
        .route("/delete_user", delete(handlers::ControllerApi::delete_user))
        .route("/set_enabled", patch(handlers::ControllerApi::set_enabled))
        .route("/update_lim_ip", patch(handlers::ControllerApi::update_lim_ip))
        .route("/adjust_date", patch(handlers::ControllerApi::adjust_date))
        .route("/update_renew", patch(handlers::ControllerApi::update_renew))
        .route("/reset_traffic_stats", post(handlers::ControllerApi::reset_traffic_stats))
        .route("/reset_clients_stats", post(handlers::ControllerApi::reset_clients_stats))
        .route("/delete_dns_stats", post(handlers::ControllerApi::delete_dns_stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer_token));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(handlers::ControllerApi::health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}

/// Rejects any `/api/v1/*` request whose `Authorization: Bearer <token>`
/// header does not match the configured token. `/health` never passes
/// through this layer — it is mounted outside the `/api/v1` nest.
async fn require_bearer_token(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == state.bearer_token.as_str() => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
