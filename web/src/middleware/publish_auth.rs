use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::*;

/// Guards internal publish routes with the configured bearer token.
///
/// When no publish token is configured every request passes; the endpoint is then
/// expected to be reachable only from inside the deployment network.
pub async fn require_publish_token(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = app_state.config.publish_token() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if tokens_match(token, expected) => next.run(request).await,
        _ => {
            warn!("Rejecting publish request without a valid bearer token");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

// Compares every byte so the time taken does not reveal the matching prefix length.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}
