//! Viewer session endpoints and the public catalog.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use streamgate_core::models::{Stream, StreamId};
use streamgate_core::service::DeviceDecision;

use super::error::{AppError, AppResult};
use super::extract::{client_ip, cookie_value, viewer_token, ACCESS_TOKEN_COOKIE};
use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub message: String,
    /// Freshly signed manifest URL so a client can rotate before its
    /// current signed URL expires, without a page round-trip.
    pub playlist_url: String,
}

/// POST /api/stream/:stream/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<HeartbeatRequest>>,
) -> AppResult<Json<HeartbeatResponse>> {
    let token = viewer_token(&headers, &query)
        .ok_or_else(|| AppError::unauthorized("Missing access token"))?;

    let session = state
        .sessions
        .session(&token)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid or expired token"))?;

    if session.stream_id.as_str() != stream {
        return Err(AppError::forbidden("Token not valid for this stream"));
    }

    // Device ID is optional; without it the heartbeat still refreshes the
    // session but gains no takeover protection.
    let device_id = body.map(|Json(req)| req.device_id).unwrap_or_default();
    if !device_id.is_empty() {
        let ip = client_ip(&headers, peer);
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let decision = state
            .device_gate
            .validate(&token, &device_id, &ip, &user_agent)
            .await?;
        if let DeviceDecision::Rejected { wait } = decision {
            tracing::warn!(
                stream_id = %session.stream_id,
                device_id = %device_id,
                wait_seconds = wait.as_secs(),
                "Device rejected - another device is active"
            );
            return Err(AppError::device_conflict(
                wait.as_secs_f64().round() as u64
            ));
        }
    }

    state
        .sessions
        .refresh_session(&token, state.config.session_duration())
        .await?;
    state
        .sessions
        .touch_presence(&session.stream_id, &token, state.config.presence_ttl())
        .await?;

    Ok(Json(HeartbeatResponse {
        success: true,
        message: "Heartbeat received".to_string(),
        playlist_url: signed_playlist_url(&state, &session.stream_id, &token),
    }))
}

#[derive(Debug, Serialize)]
pub struct PlaylistUrlResponse {
    pub playlist_url: String,
}

/// GET /api/stream/:stream/playlist
///
/// The path parameter is the stream slug; authenticates via the token
/// cookie and returns the initial signed manifest URL.
pub async fn playlist_url(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<PlaylistUrlResponse>> {
    let token = cookie_value(&headers, ACCESS_TOKEN_COOKIE)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("Missing access token"))?;

    let stream = state
        .catalog
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::not_found("Stream not found"))?;

    // Session store first; fall back to the durable payment row so a valid
    // token still works right after a session-store flush.
    let token_stream_id = match state.sessions.session(&token).await? {
        Some(session) => session.stream_id,
        None => {
            let payment = state
                .payments
                .get_by_access_token(&token)
                .await?
                .filter(streamgate_core::models::Payment::is_token_valid)
                .ok_or_else(|| AppError::unauthorized("Invalid or expired token"))?;
            payment.stream_id
        }
    };

    if token_stream_id != stream.id {
        return Err(AppError::forbidden("Token not valid for this stream"));
    }

    Ok(Json(PlaylistUrlResponse {
        playlist_url: signed_playlist_url(&state, &stream.id, &token),
    }))
}

/// GET /api/streams
pub async fn list_streams(State(state): State<AppState>) -> AppResult<Json<Vec<Stream>>> {
    Ok(Json(state.streams.list_public().await?))
}

/// GET /api/streams/:slug
///
/// Public stream info; includes the live viewer count while the stream is
/// on air. Origin secrets are excluded by serialization.
pub async fn stream_info(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let stream = state
        .catalog
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::not_found("Stream not found"))?;

    let mut body = serde_json::to_value(&stream).map_err(streamgate_core::Error::from)?;
    if stream.is_live() {
        let viewers = state.sessions.active_viewers(&stream.id).await?;
        body["viewers"] = viewers.into();
    }

    Ok(Json(body))
}

/// Absolute signed URL for a stream's root manifest.
pub(crate) fn signed_playlist_url(state: &AppState, stream_id: &StreamId, token: &str) -> String {
    let playlist_path = format!("/stream/{stream_id}/hls/stream.m3u8");
    format!(
        "{}{}",
        state.config.server.base_url,
        state.signer.sign(stream_id, token, &playlist_path)
    )
}
