//! The `/v0/` admin HTTP surface.
//!
//! Compose documents come in here, task kills and restarts go out, and the
//! registry is readable for inspection. Everything sits behind HTTP Basic
//! auth checked against the configured credentials; a failed check touches
//! nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use anyhow::{Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use stevedore_common::args::ApiArgs;
use stevedore_common::response;
use stevedore_types::{Call, ComposeDocument, Id, TaskState};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::Ctx;
use crate::translate::{self, TranslateError};
use crate::{demand, lifecycle};

#[derive(Clone)]
pub struct AppState {
    pub ctx: Ctx,
    pub username: String,
    pub password: String,
}

pub async fn run_server(ctx: Ctx, args: ApiArgs, cancel: CancellationToken) -> Result<()> {
    let state = AppState {
        ctx,
        username: args.api_username,
        password: args.api_password,
    };
    let app = Router::new()
        .route("/v0/health", get(health))
        .route("/v0/tasks", get(list_tasks))
        .route("/v0/task/{id}", get(show_task))
        .route("/v0/task/kill/{id}", get(kill_task))
        .route("/v0/task/restart/{id}", get(restart_task))
        .route("/v0/compose/{project}", put(apply_compose))
        .layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .layer(middleware::from_fn(tag_api_version))
        .layer(middleware::from_fn(stevedore_common::access_log::admin))
        .with_state(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", args.api_port).parse()?;
    tracing::info!(%addr, "starting admin API server");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

fn authorized(headers: &axum::http::HeaderMap, username: &str, password: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded) else {
        return false;
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = text.split_once(':') else {
        return false;
    };
    user == username && pass == password
}

async fn check_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if authorized(req.headers(), &state.username, &state.password) {
        next.run(req).await
    } else {
        response::unauthorized(anyhow!("invalid credentials"))
    }
}

async fn tag_api_version(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    res.headers_mut()
        .insert("Api-Service", HeaderValue::from_static("v0"));
    res
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    match state.ctx.registry.ping().await {
        Ok(()) => plain(StatusCode::OK, "ok"),
        Err(e) => response::service_unavailable(e.context("registry ping")),
    }
}

async fn list_tasks(State(state): State<AppState>) -> Response {
    match state.ctx.registry.tasks().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => response::internal_server_error(e.context("scan tasks")),
    }
}

async fn show_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let record = match state.ctx.registry.find_by_task_id(&id).await {
        Ok(Some(record)) => record,
        Ok(None) => return response::not_found(anyhow!("no task with id {id}")),
        Err(e) => return response::internal_server_error(e),
    };
    // Live container addresses, when the master has them.
    let mut container_ips: Vec<String> = Vec::new();
    if record.state == TaskState::Running {
        let framework_id = state.ctx.framework.read().framework_id().map(str::to_string);
        if let Some(framework_id) = framework_id {
            match state.ctx.master.network_info(&id, &framework_id).await {
                Ok(infos) => {
                    container_ips = infos
                        .iter()
                        .flat_map(|info| info.ip_addresses.iter())
                        .filter_map(|ip| ip.ip_address.clone())
                        .collect();
                }
                Err(e) => tracing::debug!(task_id = %id, error = %e, "network info lookup failed"),
            }
        }
    }
    Json(serde_json::json!({ "task": record, "container_ips": container_ips })).into_response()
}

async fn kill_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.ctx.is_degraded() {
        return plain(StatusCode::SERVICE_UNAVAILABLE, "nok");
    }
    match kill_by_id(&state.ctx, &id).await {
        Ok(true) => plain(StatusCode::OK, "ok"),
        Ok(false) => plain(StatusCode::OK, "nok"),
        Err(e) => {
            response::print_error(e.context(format!("kill task {id}")));
            plain(StatusCode::OK, "nok")
        }
    }
}

async fn restart_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.ctx.is_degraded() {
        return plain(StatusCode::SERVICE_UNAVAILABLE, "nok");
    }
    match restart_by_id(&state.ctx, &id).await {
        Ok(true) => plain(StatusCode::OK, "ok"),
        Ok(false) => plain(StatusCode::OK, "nok"),
        Err(e) => {
            response::print_error(e.context(format!("restart task {id}")));
            plain(StatusCode::OK, "nok")
        }
    }
}

/// Mark the record `__KILL` and tell the master to stop the task. A task
/// that never launched has nothing master-side and is deleted directly.
pub async fn kill_by_id(ctx: &Ctx, task_id: &str) -> Result<bool> {
    let Some(mut record) = ctx.registry.find_by_task_id(task_id).await? else {
        return Ok(false);
    };
    if record.agent_id.is_none() && record.is_pending() {
        ctx.registry.delete(&record.storage_key()).await?;
        return Ok(true);
    }
    record.state = TaskState::KillRequested;
    ctx.registry.put(&record).await?;
    ctx.call_master(Call::kill(
        Id::new(record.task_id.clone()),
        record.agent_id.clone().map(Id::new),
    ))
    .await?;
    Ok(true)
}

/// Replace the task with a fresh-id record awaiting placement, then kill
/// the old instance.
pub async fn restart_by_id(ctx: &Ctx, task_id: &str) -> Result<bool> {
    let Some(record) = ctx.registry.find_by_task_id(task_id).await? else {
        return Ok(false);
    };
    let mut replacement = lifecycle::restart_record(&record);
    replacement.state = TaskState::Restart;
    ctx.registry.put(&replacement).await?;
    if record.agent_id.is_some() {
        ctx.call_master(Call::kill(
            Id::new(record.task_id.clone()),
            record.agent_id.clone().map(Id::new),
        ))
        .await?;
    }
    ctx.registry.delete(&record.storage_key()).await?;
    demand::settle(ctx, true).await?;
    Ok(true)
}

#[derive(Serialize, Debug)]
pub struct ApplySummary {
    /// Records written per service.
    pub services: BTreeMap<String, usize>,
    /// Surplus instances that were told to stop.
    pub killed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

async fn apply_compose(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(doc): Json<ComposeDocument>,
) -> Response {
    if state.ctx.is_degraded() {
        return response::service_unavailable(anyhow!("registry unavailable; refusing writes"));
    }
    match apply_project(&state.ctx, &doc, &project).await {
        Ok(summary) => Json(summary).into_response(),
        Err(ApplyError::Translate(e)) => response::bad_request(e),
        Err(ApplyError::Internal(e)) => response::internal_server_error(e),
    }
}

/// Translate the document and reconcile the result against the live
/// records: fresh instances are written `__NEW`, matched instances keep
/// their identity, surplus instances are killed.
pub async fn apply_project(
    ctx: &Ctx,
    doc: &ComposeDocument,
    project: &str,
) -> Result<ApplySummary, ApplyError> {
    let desired = translate::translate_project(doc, project, &ctx.config, ctx.secrets.as_ref())
        .await?;

    let names: BTreeSet<String> = desired.iter().map(|r| r.task_name.clone()).collect();
    let mut existing = Vec::new();
    for name in &names {
        existing.extend(
            ctx.registry
                .active_instances(name)
                .await
                .map_err(ApplyError::Internal)?,
        );
    }

    let plan = translate::reconcile_replicas(existing, desired);

    let mut services: BTreeMap<String, usize> = BTreeMap::new();
    for record in &plan.put {
        *services.entry(record.service.clone()).or_default() += 1;
    }
    for record in &plan.put {
        ctx.registry.put(record).await.map_err(ApplyError::Internal)?;
    }
    let killed = plan.kill.len();
    for victim in plan.kill {
        if let Err(e) = kill_by_id(ctx, &victim.task_id).await {
            tracing::warn!(task_id = %victim.task_id, error = format!("{e:#}"), "surplus kill failed");
        }
    }

    if let Err(e) = demand::settle(ctx, true).await {
        tracing::warn!(error = format!("{e:#}"), "demand settle after apply failed");
    }
    Ok(ApplySummary { services, killed })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;

    use super::*;

    fn basic(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = BASE64.encode(format!("{user}:{pass}"));
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn valid_credentials_pass() {
        assert!(authorized(&basic("user", "password"), "user", "password"));
    }

    #[test]
    fn wrong_password_fails() {
        assert!(!authorized(&basic("user", "nope"), "user", "password"));
    }

    #[test]
    fn missing_header_fails() {
        assert!(!authorized(&HeaderMap::new(), "user", "password"));
    }

    #[test]
    fn non_basic_scheme_fails() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer token".parse().unwrap());
        assert!(!authorized(&headers, "user", "password"));
    }

    #[test]
    fn garbled_base64_fails() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic !!!".parse().unwrap());
        assert!(!authorized(&headers, "user", "password"));
    }
}
