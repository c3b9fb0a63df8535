use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use base64::Engine as _;
use futures_util::stream::{self, Stream};
use ota_auth::AuthEvent;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ── GetToken / FetchToken ─────────────────────────────────────────────

pub async fn get_token(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let token = state.auth.get_token().await?;
    let server_url = state.config.servers.first().cloned().unwrap_or_default();
    Ok(Json(json!({
        "token": base64::engine::general_purpose::STANDARD.encode(&token.0),
        "server_url": server_url,
    })))
}

pub async fn fetch_token(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let accepted = state.auth.fetch_token().await?;
    Ok(Json(json!({ "success": accepted })))
}

// ── Events (TokenStateChanged-equivalent stream) ─────────────────────────

pub async fn events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, ota_auth::AuthError>>>, ApiError> {
    let receiver = state.auth.subscribe("http-events").await?;
    let stream = stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|event| {
            let sse_event = match &event {
                AuthEvent::TokenStateChanged(token) => Event::default()
                    .event("token_state_changed")
                    .json_data(json!({
                        "token": base64::engine::general_purpose::STANDARD.encode(&token.0),
                    }))
                    .unwrap_or_else(|_| Event::default().event("error").data("encode failure")),
                AuthEvent::Error(message) => {
                    Event::default().event("error").data(message.clone())
                }
            };
            (Ok(sse_event), receiver)
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keepalive")))
}
