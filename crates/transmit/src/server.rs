//! HTTP routes exposing Transmit over SSE

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::context::{AuthOutcome, TransmitContext};
use crate::error::Error;
use crate::message::TransmitMessage;
use crate::transmit::Transmit;

/// Path of the SSE endpoint
pub const EVENTS_PATH: &str = "/__transmit/events";
/// Path of the subscribe endpoint
pub const SUBSCRIBE_PATH: &str = "/__transmit/subscribe";
/// Path of the unsubscribe endpoint
pub const UNSUBSCRIBE_PATH: &str = "/__transmit/unsubscribe";
/// Path of the stats endpoint
pub const STATS_PATH: &str = "/__transmit/stats";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub uid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub uid: Option<String>,
    pub channel: Option<String>,
}

/// Full router: transmit routes, optional admin routes, CORS and tracing
pub fn router(transmit: Transmit, enable_admin: bool) -> Router {
    let mut app = routes(transmit.clone());
    if enable_admin {
        tracing::info!("Admin stats enabled at {}", STATS_PATH);
        app = app.merge(admin_routes(transmit));
    }
    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
}

/// Routes for streaming, subscribing and unsubscribing
pub fn routes(transmit: Transmit) -> Router {
    Router::new()
        .route(EVENTS_PATH, get(events))
        .route(SUBSCRIBE_PATH, post(subscribe))
        .route(UNSUBSCRIBE_PATH, post(unsubscribe))
        .with_state(transmit)
}

/// Read-only view of connected clients; not meant to be public
pub fn admin_routes(transmit: Transmit) -> Router {
    Router::new()
        .route(STATS_PATH, get(get_stats))
        .with_state(transmit)
}

fn context_from(headers: &HeaderMap, uid: Option<String>) -> TransmitContext {
    let mut context = TransmitContext::anonymous();
    context.uid = uid;
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            context.headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    context.client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());
    context
}

fn to_sse_event(message: TransmitMessage) -> Event {
    Event::default().data(message.to_data())
}

/// SSE connection endpoint
pub async fn events(
    State(transmit): State<Transmit>,
    Query(params): Query<EventsParams>,
    headers: HeaderMap,
) -> Response {
    let context = Arc::new(context_from(&headers, params.uid));

    let (_stream, outbound) = match transmit.create_stream(context.clone()) {
        Ok(created) => created,
        Err(Error::MissingUid) => {
            tracing::warn!(client_ip = ?context.client_ip, "Stream rejected: missing uid");
            return (StatusCode::BAD_REQUEST, "uid is required").into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to open stream");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let events = outbound.map(|message| Ok::<_, Infallible>(to_sse_event(message)));

    Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE_INTERVAL)
                .text("keep-alive"),
        )
        .into_response()
}

fn outcome_response(success: bool, context: &TransmitContext) -> Response {
    if success {
        return StatusCode::NO_CONTENT.into_response();
    }
    match context.outcome() {
        Some(AuthOutcome::Forbidden) => StatusCode::FORBIDDEN.into_response(),
        Some(AuthOutcome::InternalError) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

fn require_fields(request: ChannelRequest) -> Result<(String, String), Response> {
    match (request.uid, request.channel) {
        (Some(uid), Some(channel)) if !uid.is_empty() && !channel.is_empty() => Ok((uid, channel)),
        _ => Err((StatusCode::BAD_REQUEST, "uid and channel are required").into_response()),
    }
}

/// Subscribe endpoint
pub async fn subscribe(
    State(transmit): State<Transmit>,
    headers: HeaderMap,
    Json(request): Json<ChannelRequest>,
) -> Response {
    let (uid, channel) = match require_fields(request) {
        Ok(fields) => fields,
        Err(response) => return response,
    };
    let context = Arc::new(context_from(&headers, Some(uid.clone())));
    let success = transmit.subscribe(&uid, &channel, context.clone()).await;
    tracing::info!(uid = %uid, channel = %channel, success, "Subscribe request");
    outcome_response(success, &context)
}

/// Unsubscribe endpoint
pub async fn unsubscribe(
    State(transmit): State<Transmit>,
    headers: HeaderMap,
    Json(request): Json<ChannelRequest>,
) -> Response {
    let (uid, channel) = match require_fields(request) {
        Ok(fields) => fields,
        Err(response) => return response,
    };
    let context = Arc::new(context_from(&headers, Some(uid.clone())));
    let success = transmit.unsubscribe(&uid, &channel, context.clone());
    tracing::info!(uid = %uid, channel = %channel, success, "Unsubscribe request");
    outcome_response(success, &context)
}

// Stats endpoint
#[derive(Serialize)]
pub struct StatsResponse {
    pub instance_id: String,
    pub total_clients: usize,
    pub clients: Vec<ClientStats>,
}

#[derive(Serialize)]
pub struct ClientStats {
    pub uid: String,
    pub connection_id: String,
    pub connected_at: String,
    pub is_open: bool,
    pub channels: Vec<String>,
}

pub async fn get_stats(State(transmit): State<Transmit>) -> Json<StatsResponse> {
    let clients: Vec<ClientStats> = transmit
        .registry()
        .get_all_subscribers()
        .into_iter()
        .map(|(stream, channels)| {
            let mut channels: Vec<String> = channels.into_iter().collect();
            channels.sort();
            ClientStats {
                uid: stream.uid().to_string(),
                connection_id: stream.id().to_string(),
                connected_at: stream.connected_at().to_rfc3339(),
                is_open: stream.is_open(),
                channels,
            }
        })
        .collect();

    Json(StatsResponse {
        instance_id: transmit.instance_id().to_string(),
        total_clients: clients.len(),
        clients,
    })
}
