//! Authentication middleware for admin endpoints

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

use crate::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Middleware that checks the admin token header. A service started
/// without `ADMIN_AUTH_TOKEN` refuses every admin request.
pub async fn require_admin(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = app_state.admin_token.as_deref() else {
        warn!("Admin request rejected: ADMIN_AUTH_TOKEN is not configured");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    if provided != Some(expected) {
        info!("Admin request rejected: missing or wrong {}", ADMIN_TOKEN_HEADER);
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
