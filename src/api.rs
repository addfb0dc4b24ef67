//! REST endpoints: delivery listings, adapter metadata, email ingestion.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::model::EventId;
use crate::parser::InboundEmail;
use crate::pipeline::DeliveryPipeline;
use crate::registry::AdapterRegistries;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DeliveryPipeline>,
    pub registries: Arc<AdapterRegistries>,
}

/// Build the Axum router with all REST routes.
pub fn api_routes(pipeline: Arc<DeliveryPipeline>, registries: Arc<AdapterRegistries>) -> Router {
    let state = AppState {
        pipeline,
        registries,
    };

    Router::new()
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/today", get(deliveries_today))
        .route("/deliveries/date/{date}", get(deliveries_for_date))
        .route("/deliveries/{id}/outcomes", get(delivery_outcomes))
        .route("/deliveries/{id}/history", get(delivery_history))
        .route("/meta/adapters", get(meta_adapters))
        .route("/meta/providers", get(meta_providers))
        .route("/meta/parsers", get(meta_parsers))
        .route("/meta/targets", get(meta_targets))
        .route("/meta/config", get(meta_config))
        .route("/debug/parse-email", post(debug_parse_email))
        .route("/api/emails", post(submit_email))
        .with_state(state)
}

fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "parcel-router"
    }))
}

async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "pong" }))
}

// ── Deliveries ──────────────────────────────────────────────────────────

async fn list_deliveries(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.store().list_all().await)
}

async fn deliveries_today(State(state): State<AppState>) -> impl IntoResponse {
    let today = Local::now().date_naive();
    Json(state.pipeline.store().list_for_date(today).await)
}

async fn deliveries_for_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> impl IntoResponse {
    let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
        return error_response(StatusCode::BAD_REQUEST, "Expected a date as YYYY-MM-DD")
            .into_response();
    };
    Json(state.pipeline.store().list_for_date(date).await).into_response()
}

async fn delivery_outcomes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = EventId::from(id);
    if state.pipeline.store().get(&id).await.is_none() {
        return error_response(StatusCode::NOT_FOUND, "Delivery not found").into_response();
    }
    Json(state.pipeline.router().outcomes_for(&id).await).into_response()
}

async fn delivery_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.pipeline.store().history(&EventId::from(id)).await {
        Some(history) => Json(history).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Delivery not found").into_response(),
    }
}

// ── Metadata ────────────────────────────────────────────────────────────

async fn meta_adapters(State(state): State<AppState>) -> impl IntoResponse {
    let registries = &state.registries;
    Json(serde_json::json!({
        "providers": registries.providers.list_keys(),
        "parsers": registries.parsers.list_keys(),
        "targets": registries.targets.list_keys(),
    }))
}

async fn meta_providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registries.providers.list_keys())
}

async fn meta_parsers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registries.parsers.list_keys())
}

async fn meta_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registries.targets.list_keys())
}

async fn meta_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.pipeline.router().config().await;
    Json((*config).clone())
}

// ── Email ingestion ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DebugParseRequest {
    raw_email: String,
    parser_hint: Option<String>,
    provider_hint: Option<String>,
}

/// Parse only. Nothing is stored or routed.
async fn debug_parse_email(
    State(state): State<AppState>,
    Json(body): Json<DebugParseRequest>,
) -> impl IntoResponse {
    let email = InboundEmail::new(body.raw_email, "debug", Utc::now());
    let result = state.pipeline.parser().parse(
        &email,
        body.provider_hint.as_deref(),
        body.parser_hint.as_deref(),
    );

    match result {
        Ok(event) => {
            debug!(event_id = %event.id, "Debug parse succeeded");
            Json(serde_json::json!({
                "parsed": true,
                "event": event,
            }))
        }
        Err(failure) => Json(serde_json::json!({
            "parsed": false,
            "failure": failure,
            "available_parsers": state.registries.parsers.list_keys(),
            "parser_hint": body.parser_hint,
        })),
    }
}

#[derive(Deserialize)]
struct SubmitEmailRequest {
    raw_email: String,
    mail_account: String,
    received_at: Option<DateTime<Utc>>,
    parser_hint: Option<String>,
}

async fn submit_email(
    State(state): State<AppState>,
    Json(body): Json<SubmitEmailRequest>,
) -> impl IntoResponse {
    let email = InboundEmail::new(
        body.raw_email,
        body.mail_account,
        body.received_at.unwrap_or_else(Utc::now),
    );

    match state
        .pipeline
        .submit(email, body.parser_hint.as_deref())
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            warn!(error = %e, "Rejected inbound email");
            let status = match e {
                PipelineError::UnknownAccount(_) | PipelineError::AccountDisabled(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            };
            error_response(status, e.to_string()).into_response()
        }
    }
}
