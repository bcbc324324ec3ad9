//! Handler implementations for every route in `http::build_router` (§6).
//! Grouped under one unit struct, the way the rest of the node-facing
//! service layer groups its static methods, so route wiring reads as
//! `ControllerApi::<endpoint>` rather than a flat list of free functions.

use axum::extract::{Multipart, Query, State};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Form, Json};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use controller_domain::subscription::{apply_offset, format_now, parse_adjust_offset};
use controller_domain::traffic::InboundTraffic;
use controller_domain::user::User;
use controller_domain::DnsRecord;

use crate::error::ApiError;
use crate::http::AppState;
use crate::services::effectuation::set_enabled_effectuated;

const DATE_FORMAT: &str = "%Y-%m-%d-%H";
const MAX_IP_LIMIT: i64 = 100;
const DEFAULT_DNS_COUNT: i64 = 10;

fn default_true() -> bool {
    true
}

fn default_dns_count() -> i64 {
    DEFAULT_DNS_COUNT
}

#[derive(Debug, Deserialize)]
pub struct NodeFilter {
    pub node: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DnsStatsQuery {
    pub node: String,
    pub user: String,
    #[serde(default = "default_dns_count")]
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddUserForm {
    pub node: String,
    pub username: String,
    pub credential: Option<String>,
    pub inbound_tag: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserForm {
    pub node: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledForm {
    pub node: String,
    pub username: String,
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub hot_restart: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLimIpForm {
    pub node: String,
    pub username: String,
    pub ip_limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustDateForm {
    pub node: String,
    pub username: String,
    pub offset: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRenewForm {
    pub node: String,
    pub username: String,
    pub renew_days: i64,
}

#[derive(Debug, Serialize)]
pub struct CompositeStats {
    pub users: Vec<User>,
    pub inbound_traffic: Vec<InboundTraffic>,
}

pub struct ControllerApi;

impl ControllerApi {
    pub async fn health() -> impl IntoResponse {
        Json(json!({ "status": "ok" }))
    }

    #[instrument(skip(state))]
    pub async fn list_users(State(state): State<AppState>, Query(filter): Query<NodeFilter>) -> Result<Json<Vec<User>>, ApiError> {
        let node = filter.node;
        let users = state
            .manager
            .query_low(move |handle| {
                let node = node.clone();
                async move { handle.list_users(node.as_deref()).await }
            })
            .await?;
        Ok(Json(users))
    }

    #[instrument(skip(state))]
    pub async fn composite_stats(
        State(state): State<AppState>,
        Query(filter): Query<NodeFilter>,
    ) -> Result<Json<CompositeStats>, ApiError> {
        let node = filter.node;
        let node_for_inbound = node.clone();
        let users = state
            .manager
            .query_low(move |handle| {
                let node = node.clone();
                async move { handle.list_users(node.as_deref()).await }
            })
            .await?;
        let inbound_traffic = state
            .manager
            .query_low(move |handle| {
                let node = node_for_inbound.clone();
                async move { handle.list_inbound_traffic(node.as_deref()).await }
            })
            .await?;
        Ok(Json(CompositeStats { users, inbound_traffic }))
    }

    #[instrument(skip(state))]
    pub async fn dns_stats(State(state): State<AppState>, Query(query): Query<DnsStatsQuery>) -> Result<Json<Vec<DnsRecord>>, ApiError> {
        if query.count <= 0 {
            return Err(ApiError::Validation("count must be a positive integer".into()));
        }
        let DnsStatsQuery { node, user, count } = query;
        let records = state
            .manager
            .query_low(move |handle| {
                let node = node.clone();
                let user = user.clone();
                async move { handle.top_dns(&node, &user, count).await }
            })
            .await?;
        Ok(Json(records))
    }

    #[instrument(skip(state))]
    pub async fn add_user(State(state): State<AppState>, Form(payload): Form<AddUserForm>) -> Result<StatusCode, ApiError> {
        validate_known_node(&state, &payload.node)?;
        if payload.username.trim().is_empty() {
            return Err(ApiError::Validation("username must not be empty".into()));
        }
        if payload.inbound_tag.trim().is_empty() {
            return Err(ApiError::Validation("inbound_tag must not be empty".into()));
        }

        let credential = payload.credential.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = format_now(state.clock.now());

        let node = payload.node.clone();
        let username = payload.username.clone();
        let enabled = payload.enabled;
        let now_for_insert = now.clone();
        state
            .manager
            .execute_high(move |handle| {
                let node = node.clone();
                let username = username.clone();
                let now = now_for_insert.clone();
                async move {
                    if handle.user_exists(&node, &username).await? {
                        handle.set_enabled(&node, &username, enabled).await?;
                    } else {
                        handle.insert_new_user(&node, &username, enabled, &now).await?;
                    }
                    Ok(())
                }
            })
            .await?;

        let node = payload.node.clone();
        let username = payload.username.clone();
        let credential_for_binding = credential.clone();
        let inbound_tag = payload.inbound_tag.clone();
        state
            .manager
            .execute_high(move |handle| {
                let node = node.clone();
                let username = username.clone();
                let credential = credential_for_binding.clone();
                let inbound_tag = inbound_tag.clone();
                async move { handle.insert_binding(&node, &username, &credential, &inbound_tag).await }
            })
            .await?;

        info!(node = payload.node, username = payload.username, "user added via HTTP API");
        Ok(StatusCode::CREATED)
    }

    /// Accepts a multipart upload: a `node` text field identifying the
    /// target node, followed by a `file` field whose body is one
    /// `username,inbound_tag[,credential]` record per line. Blank lines and
    /// lines starting with `#` are skipped. Each record is applied
    /// independently — one malformed line does not abort the rest of the
    /// file.
    #[instrument(skip(state, multipart))]
    pub async fn bulk_add_users(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<BulkAddReport>, ApiError> {
        let mut node: Option<String> = None;
        let mut body: Option<String> = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::Validation(format!("malformed multipart upload: {err}")))?
        {
            match field.name() {
                Some("node") => {
                    node = Some(
                        field
                            .text()
                            .await
                            .map_err(|err| ApiError::Validation(format!("unreadable node field: {err}")))?,
                    )
                }
                Some("file") => {
                    body = Some(
                        field
                            .text()
                            .await
                            .map_err(|err| ApiError::Validation(format!("unreadable file field: {err}")))?,
                    )
                }
                _ => continue,
            }
        }

        let node = node.ok_or_else(|| ApiError::Validation("multipart upload is missing the node field".into()))?;
        let body = body.ok_or_else(|| ApiError::Validation("multipart upload is missing the file field".into()))?;
        validate_known_node(&state, &node)?;

        let now = format_now(state.clock.now());
        let mut report = BulkAddReport::default();

        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(3, ',').map(str::trim);
            let (Some(username), Some(inbound_tag)) = (parts.next(), parts.next()) else {
                report.rejected += 1;
                continue;
            };
            if username.is_empty() || inbound_tag.is_empty() {
                report.rejected += 1;
                continue;
            }
            let credential = parts
                .next()
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let node_owned = node.clone();
            let username_owned = username.to_string();
            let now_owned = now.clone();
            let insert = state
                .manager
                .execute_high(move |handle| {
                    let node = node_owned.clone();
                    let username = username_owned.clone();
                    let now = now_owned.clone();
                    async move {
                        if !handle.user_exists(&node, &username).await? {
                            handle.insert_new_user(&node, &username, true, &now).await?;
                        }
                        Ok(())
                    }
                })
                .await;
            if insert.is_err() {
                report.rejected += 1;
                continue;
            }

            let node_owned = node.clone();
            let username_owned = username.to_string();
            let inbound_tag_owned = inbound_tag.to_string();
            let credential_owned = credential.clone();
            let bound = state
                .manager
                .execute_high(move |handle| {
                    let node = node_owned.clone();
                    let username = username_owned.clone();
                    let credential = credential_owned.clone();
                    let inbound_tag = inbound_tag_owned.clone();
                    async move { handle.insert_binding(&node, &username, &credential, &inbound_tag).await }
                })
                .await;
            match bound {
                Ok(()) => report.added += 1,
                Err(_) => report.rejected += 1,
            }
        }

        info!(node, added = report.added, rejected = report.rejected, "bulk user import complete");
        Ok(Json(report))
    }

    #[instrument(skip(state))]
    pub async fn delete_user(State(state): State<AppState>, Form(payload): Form<DeleteUserForm>) -> Result<StatusCode, ApiError> {
        let node = payload.node.clone();
        let username = payload.username.clone();
        state
            .manager
            .execute_high(move |handle| {
                let node = node.clone();
                let username = username.clone();
                async move { handle.delete_user(&node, &username).await }
            })
            .await?;
        Ok(StatusCode::NO_CONTENT)
    }

    #[instrument(skip(state))]
    pub async fn set_enabled(State(state): State<AppState>, Form(payload): Form<SetEnabledForm>) -> Result<StatusCode, ApiError> {
        set_enabled_effectuated(
            &state.manager,
            state.roster.as_ref(),
            &payload.node,
            &payload.username,
            payload.enabled,
            payload.hot_restart,
        )
        .await?;
        Ok(StatusCode::OK)
    }

    #[instrument(skip(state))]
    pub async fn update_lim_ip(State(state): State<AppState>, Form(payload): Form<UpdateLimIpForm>) -> Result<StatusCode, ApiError> {
        if !(0..=MAX_IP_LIMIT).contains(&payload.ip_limit) {
            return Err(ApiError::Validation(format!("ip_limit must be between 0 and {MAX_IP_LIMIT}")));
        }
        let node = payload.node.clone();
        let username = payload.username.clone();
        let ip_limit = payload.ip_limit;
        state
            .manager
            .execute_high(move |handle| {
                let node = node.clone();
                let username = username.clone();
                async move { handle.set_ip_limit(&node, &username, ip_limit).await }
            })
            .await?;
        Ok(StatusCode::OK)
    }

    /// `offset == "0"` clears `sub_end` (unlimited subscription) without
    /// touching `enabled`. Any other value is parsed through the
    /// `days[:hours]` offset grammar and applied against the user's current
    /// `sub_end` (or `now` if unset). A successful write opportunistically
    /// runs one `LifecycleController` pass so the effect (expiry,
    /// auto-renew, re-enable) is visible in the same request rather than
    /// waiting for the next hourly tick (§4.6).
    #[instrument(skip(state))]
    pub async fn adjust_date(State(state): State<AppState>, Form(payload): Form<AdjustDateForm>) -> Result<StatusCode, ApiError> {
        let node = payload.node.clone();
        let username = payload.username.clone();

        if payload.offset.trim() == "0" {
            state
                .manager
                .execute_high(move |handle| {
                    let node = node.clone();
                    let username = username.clone();
                    async move { handle.set_sub_end(&node, &username, "").await }
                })
                .await?;
        } else {
            let offset = parse_adjust_offset(&payload.offset)
                .ok_or_else(|| ApiError::Validation(format!("unparsable offset: {}", payload.offset)))?;

            let node_for_lookup = payload.node.clone();
            let username_for_lookup = payload.username.clone();
            let existing = state
                .manager
                .query_low(move |handle| {
                    let node = node_for_lookup.clone();
                    let username = username_for_lookup.clone();
                    async move { handle.get_user(&node, &username).await }
                })
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("{}/{}", payload.node, payload.username)))?;

            let now = state.clock.now();
            let base = if existing.sub_end.is_empty() {
                now
            } else {
                NaiveDateTime::parse_from_str(&existing.sub_end, DATE_FORMAT).unwrap_or(now)
            };
            let new_sub_end = apply_offset(base, offset);

            let node = payload.node.clone();
            let username = payload.username.clone();
            state
                .manager
                .execute_high(move |handle| {
                    let node = node.clone();
                    let username = username.clone();
                    let new_sub_end = new_sub_end.clone();
                    async move { handle.set_sub_end(&node, &username, &new_sub_end).await }
                })
                .await?;
        }

        let summary = state
            .lifecycle
            .tick(&state.manager, state.notifier.as_ref(), state.roster.as_ref(), state.clock.now())
            .await;
        if summary.disabled > 0 || summary.re_enabled > 0 || summary.renewals > 0 {
            info!(
                node = payload.node,
                username = payload.username,
                disabled = summary.disabled,
                re_enabled = summary.re_enabled,
                renewals = summary.renewals,
                "opportunistic lifecycle tick after adjust_date"
            );
        }
        Ok(StatusCode::OK)
    }

    #[instrument(skip(state))]
    pub async fn update_renew(State(state): State<AppState>, Form(payload): Form<UpdateRenewForm>) -> Result<StatusCode, ApiError> {
        if payload.renew_days < 0 {
            return Err(ApiError::Validation("renew_days must not be negative".into()));
        }
        let node = payload.node.clone();
        let username = payload.username.clone();
        let renew_days = payload.renew_days;
        state
            .manager
            .execute_high(move |handle| {
                let node = node.clone();
                let username = username.clone();
                async move { handle.set_renew_days(&node, &username, renew_days).await }
            })
            .await?;
        Ok(StatusCode::OK)
    }

    /// Zeroes inbound (per-tag) counters, not per-user ones (§6: `/reset_traffic_stats`).
    #[instrument(skip(state))]
    pub async fn reset_traffic_stats(State(state): State<AppState>, Query(filter): Query<NodeFilter>) -> Result<StatusCode, ApiError> {
        let node = filter.node;
        state
            .manager
            .execute_high(move |handle| {
                let node = node.clone();
                async move { handle.reset_inbound_traffic(node.as_deref()).await }
            })
            .await?;
        Ok(StatusCode::OK)
    }

    /// Zeroes per-user ("client") counters, not inbound ones (§6: `/reset_clients_stats`).
    #[instrument(skip(state))]
    pub async fn reset_clients_stats(State(state): State<AppState>, Query(filter): Query<NodeFilter>) -> Result<StatusCode, ApiError> {
        let node = filter.node;
        state
            .manager
            .execute_high(move |handle| {
                let node = node.clone();
                async move { handle.reset_user_traffic(node.as_deref()).await }
            })
            .await?;
        Ok(StatusCode::OK)
    }

    #[instrument(skip(state))]
    pub async fn delete_dns_stats(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
        state.manager.execute_high(|handle| async move { handle.truncate_dns().await }).await?;
        Ok(StatusCode::OK)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BulkAddReport {
    pub added: u32,
    pub rejected: u32,
}

fn validate_known_node(state: &AppState, node: &str) -> Result<(), ApiError> {
    if state.known_nodes.iter().any(|n| n == node) {
        Ok(())
    } else {
        warn!(node, "rejected a request naming an unconfigured node");
        Err(ApiError::Validation(format!("unknown node: {node}")))
    }
}
