use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::JwtClaims;
use crate::error::ApiError;
use crate::models::Identity;
use crate::services::AppState;

pub fn extract_client_ip_from(headers: &HeaderMap, extensions: &Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // x-forwarded-for can be a comma separated list; take first
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            for part in s.split(';').flat_map(|p| p.split(',')) {
                if let Some(value) = part.trim().strip_prefix("for=") {
                    return value.trim().trim_matches('"').to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

/// Caller identity for admission: the token subject when a valid token was
/// presented, the client address otherwise.
pub fn resolve_identity(headers: &HeaderMap, extensions: &Extensions) -> Identity {
    match extensions.get::<JwtClaims>() {
        Some(claims) => Identity::user(&claims.sub),
        None => Identity::ip(&extract_client_ip_from(headers, extensions)),
    }
}

pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = resolve_identity(request.headers(), request.extensions());
    let decision = state.admission.admit(&identity).await;

    if !decision.is_allowed() {
        tracing::warn!(identity = %identity, ?decision, "Request refused by admission control");
        return Err(ApiError::rate_conflict(
            "Too many requests, please try again later",
            decision.retry_after(),
        ));
    }

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
