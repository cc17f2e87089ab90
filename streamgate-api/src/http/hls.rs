//! Signed HLS delivery: the hot path.
//!
//! One route serves both manifests and segments. Manifests are gated by the
//! signature plus a live session and rewritten per token; segments are
//! authorized by the signature alone and served straight from the coalesced
//! cache.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
};

use streamgate_core::{
    hls,
    models::Stream,
    signer::SignatureError,
    upstream::{UpstreamError, PLAYLIST_CONTENT_TYPE},
};

use super::error::{AppError, AppResult};
use super::extract::parse_stream_id;
use super::AppState;

/// GET /stream/:stream/hls/*path
pub async fn serve_hls(
    State(state): State<AppState>,
    Path((stream, hls_path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let stream_id = parse_stream_id(&stream)?;

    let stream = state
        .catalog
        .get_by_id(&stream_id)
        .await?
        .ok_or_else(|| AppError::not_found("Stream not found"))?;

    // Scheduled/ended streams are refused before any upstream traffic.
    if !stream.is_live() {
        return Err(AppError::forbidden("Stream is not live"));
    }

    // The signature binds stream, token, path and expiry; the path is the
    // request path exactly as signed during rewriting.
    let request_path = format!("/stream/{stream_id}/hls/{hls_path}");
    let params = state
        .signer
        .verify_query(&stream_id, &request_path, &query)
        .map_err(|err| match err {
            SignatureError::Malformed => AppError::bad_request("Missing signature parameters"),
            // Invalid and expired stay indistinguishable to the client.
            SignatureError::Expired | SignatureError::Invalid => {
                tracing::warn!(
                    stream_id = %stream_id,
                    path = %hls_path,
                    "Rejected signed URL: {err}"
                );
                AppError::forbidden("Invalid or expired signature")
            }
        })?;

    let upstream_url = stream.upstream_hls_url(&hls_path);

    if hls_path.ends_with(".m3u8") {
        serve_playlist(&state, &stream, &upstream_url, &params.token, &hls_path).await
    } else {
        serve_segment(&state, &upstream_url, &hls_path).await
    }
}

async fn serve_playlist(
    state: &AppState,
    stream: &Stream,
    upstream_url: &str,
    token: &str,
    hls_path: &str,
) -> AppResult<Response> {
    // Playlist-level session gate: a signed URL alone does not grant a
    // manifest; the token must map to a live session for this stream.
    let session = state
        .sessions
        .session(token)
        .await?
        .ok_or_else(|| AppError::unauthorized("Session expired"))?;
    if session.stream_id != stream.id {
        return Err(AppError::forbidden("Token not valid for this stream"));
    }

    let fetched = state
        .upstream
        .fetch_playlist(upstream_url)
        .await
        .map_err(|err| upstream_failure(err, hls_path))?;

    // Rewriting happens after the (token-agnostic) fetch, binding every
    // media URI to this viewer's token.
    let playlist = String::from_utf8_lossy(&fetched.bytes);
    let rewritten = hls::rewrite_playlist(
        &playlist,
        &stream.id,
        token,
        hls::base_dir_of(hls_path),
        &state.signer,
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from(rewritten.into_bytes()))
        .map_err(|e| AppError::internal(format!("Failed to build response: {e}")))
}

async fn serve_segment(state: &AppState, upstream_url: &str, hls_path: &str) -> AppResult<Response> {
    let fetched = state
        .upstream
        .fetch_segment(upstream_url)
        .await
        .map_err(|err| upstream_failure(err, hls_path))?;

    // The signed, short-lived URL is the authorization, so shared caches
    // may hold the segment.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, fetched.content_type)
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from(fetched.bytes))
        .map_err(|e| AppError::internal(format!("Failed to build response: {e}")))
}

// Logged with the HLS path only; the origin URL stays out of the logs.
fn upstream_failure(err: UpstreamError, hls_path: &str) -> AppError {
    tracing::warn!(path = %hls_path, "Upstream fetch failed: {err}");
    AppError::bad_gateway("Failed to fetch stream")
}
