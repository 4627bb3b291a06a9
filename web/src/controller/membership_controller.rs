use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::params::membership::{MembershipParams, MembershipResponse};
use crate::AppState;
use events::DomainEvent;
use log::*;

/// POST a membership change so the subject's live clients join or leave organization scopes.
///
/// Responds with the number of live clients the subject currently has.
pub async fn update_membership(
    State(app_state): State<AppState>,
    Json(params): Json<MembershipParams>,
) -> impl IntoResponse {
    debug!(
        "POST membership for subject {}: {:?}",
        params.subject_id, params.group_ids
    );

    app_state
        .event_publisher
        .publish(DomainEvent::MembershipChanged {
            user_id: params.subject_id,
            organization_ids: params.group_ids,
        })
        .await;

    let clients = app_state.hub.subject_client_count(params.subject_id);
    (StatusCode::OK, Json(MembershipResponse { clients }))
}
