use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as PathExtract, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, stream};
use tracing::{debug, warn};

use crate::handlers::problem_details;
use crate::protocol::{Exchange, ReadyEvent, SessionId, SubmitRequest, SubmitResponse, sse};
use crate::server::AppState;
use crate::session::SubmitOutcome;

const SHUTTING_DOWN: &str = "server is shutting down";

/// POST /api/v1/sessions/{session_id}/messages
///
/// Accepts a message for background processing. The reply is delivered on the
/// session's Push stream; the response only acknowledges receipt.
pub async fn submit_message(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    if state.is_shutting_down() {
        return problem_details::service_unavailable(SHUTTING_DOWN).into_response();
    }
    let session_id = match SessionId::parse(session_id) {
        Ok(id) => id,
        Err(e) => return problem_details::bad_request(e.to_string()).into_response(),
    };
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return problem_details::bad_request(rejection.body_text()).into_response();
        }
    };

    let outcome = state.dispatcher.submit(req.message, session_id.clone());

    let response = SubmitResponse {
        session_id,
        accepted: matches!(outcome, SubmitOutcome::Dispatched { .. }),
        exchange_id: outcome.exchange_id().map(str::to_string),
    };
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

/// GET /api/v1/sessions/{session_id}/events
///
/// Opens the session's Push stream. A `ready` event is sent once the
/// subscription is registered, then one `exchange` event per delivered
/// exchange. Closing the connection unregisters the subscriber; the stream
/// ends once the server has drained on shutdown.
pub async fn stream_events(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> Response {
    if state.is_shutting_down() {
        return problem_details::service_unavailable(SHUTTING_DOWN).into_response();
    }
    let session_id = match SessionId::parse(session_id) {
        Ok(id) => id,
        Err(e) => return problem_details::bad_request(e.to_string()).into_response(),
    };

    let subscription = state.registry.subscribe(session_id.clone());
    debug!(session_id = %session_id, "Push stream opened");

    let ready = stream::iter(ready_event(session_id));
    let exchanges = subscription.filter_map(|exchange| async move { exchange_event(&exchange) });
    let events = ready.chain(exchanges).map(Ok::<_, Infallible>);

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(events).keep_alive(keep_alive).into_response()
}

fn ready_event(session_id: SessionId) -> Option<Event> {
    Event::default()
        .event(sse::READY)
        .json_data(ReadyEvent { session_id })
        .inspect_err(|e| warn!(error = %e, "Failed to encode ready event"))
        .ok()
}

fn exchange_event(exchange: &Exchange) -> Option<Event> {
    Event::default()
        .event(sse::EXCHANGE)
        .id(exchange.id.as_str())
        .json_data(exchange)
        .inspect_err(|e| warn!(exchange_id = %exchange.id, error = %e, "Failed to encode exchange"))
        .ok()
}
