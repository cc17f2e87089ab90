//! Token issuance on payment completion, and recovery by email.
//!
//! The payment gateway collaborator verifies its own callback signatures;
//! what arrives here is the completed-payment signal carrying the unique
//! payment reference ("stamp").

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};

use streamgate_core::service::{GrantedAccess, PaymentConfirmation, RecoveryOutcome};

use super::error::{AppError, AppResult};
use super::extract::{access_cookie, client_ip};
use super::AppState;

/// Every post-rate-limit branch takes at least this long, so response
/// timing cannot reveal whether an email has a purchase.
const RESPONSE_FLOOR: Duration = Duration::from_millis(500);

/// The same answer for unknown emails and unknown streams.
const NO_PURCHASE_MESSAGE: &str = "No active purchase found for this email.";

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub stamp: String,
}

/// GET /api/payment/confirm
///
/// Issues the access token for a completed payment, sets the token cookie
/// and redirects to the watch page. Idempotent on replayed signals.
pub async fn confirm(
    State(state): State<AppState>,
    Query(params): Query<ConfirmQuery>,
) -> AppResult<Response> {
    if params.stamp.is_empty() {
        return Err(AppError::bad_request("stamp is required"));
    }

    let granted = match state.access.confirm_payment(&params.stamp).await? {
        PaymentConfirmation::Completed(granted)
        | PaymentConfirmation::AlreadyCompleted(granted) => granted,
        PaymentConfirmation::Unknown => {
            return Err(AppError::not_found("Payment not found"));
        }
    };

    let base_url = &state.config.server.base_url;
    let location = match state.catalog.get_by_id(&granted.stream_id).await? {
        Some(stream) => format!("{base_url}/watch/{}", stream.slug),
        None => base_url.clone(),
    };

    redirect_with_cookie(&state, &granted, &location)
}

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    #[serde(default)]
    pub stream_slug: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RecoverResponse {
    pub success: bool,
    pub message: String,
    pub redirect_url: String,
}

/// POST /api/payment/recover
pub async fn recover(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<RecoverRequest>,
) -> AppResult<Response> {
    if req.stream_slug.is_empty() {
        return Err(AppError::bad_request("stream_slug is required"));
    }
    if req.email.is_empty() {
        return Err(AppError::bad_request("email is required"));
    }

    let ip = client_ip(&headers, peer);
    let allowed = state
        .sessions
        .allow_recovery(
            &req.email,
            &ip,
            state.config.security.recovery_rate_limit_per_email,
            state.config.security.recovery_rate_limit_per_ip,
        )
        .await
        .unwrap_or_else(|err| {
            // A broken limiter must not leak which emails exist.
            tracing::error!("Recovery rate limit check failed: {err}");
            true
        });
    if !allowed {
        tracing::warn!(ip = %ip, "Recovery rate limit exceeded");
        return Err(AppError::too_many_requests());
    }

    // Wall-clock floor on every remaining branch, hit or miss.
    let started = Instant::now();
    let result = recover_inner(&state, &req).await;
    let elapsed = started.elapsed();
    if elapsed < RESPONSE_FLOOR {
        tokio::time::sleep(RESPONSE_FLOOR - elapsed).await;
    }
    result
}

async fn recover_inner(state: &AppState, req: &RecoverRequest) -> AppResult<Response> {
    let Some(stream) = state.catalog.get_by_slug(&req.stream_slug).await? else {
        return Err(AppError::not_found(NO_PURCHASE_MESSAGE));
    };

    match state.access.recover(&stream, &req.email).await? {
        RecoveryOutcome::NoPurchase => Err(AppError::not_found(NO_PURCHASE_MESSAGE)),
        RecoveryOutcome::Expired => Err(AppError::gone("Your access has expired.")),
        RecoveryOutcome::Recovered(granted) => {
            let body = RecoverResponse {
                success: true,
                message: "Access recovered successfully".to_string(),
                redirect_url: format!(
                    "{}/watch/{}",
                    state.config.server.base_url, stream.slug
                ),
            };
            let payload =
                serde_json::to_vec(&body).map_err(streamgate_core::Error::from)?;

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::SET_COOKIE, token_cookie(state, &granted.token))
                .body(Body::from(payload))
                .map_err(|e| AppError::internal(format!("Failed to build response: {e}")))
        }
    }
}

fn redirect_with_cookie(
    state: &AppState,
    granted: &GrantedAccess,
    location: &str,
) -> AppResult<Response> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header(header::SET_COOKIE, token_cookie(state, &granted.token))
        .body(Body::empty())
        .map_err(|e| AppError::internal(format!("Failed to build response: {e}")))
}

fn token_cookie(state: &AppState, token: &str) -> String {
    access_cookie(
        token,
        state.config.security.session_duration_seconds,
        state.config.server.base_url.starts_with("https://"),
    )
}
