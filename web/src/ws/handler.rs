use crate::extractors::authenticated_subject::AuthenticatedSubject;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use hub::WebSocketConnection;
use log::*;
use service::AppState;

/// WebSocket handler that hands an upgraded connection to the hub.
/// One connection per browser tab; a user may hold several at once.
pub(crate) async fn ws_handler(
    AuthenticatedSubject {
        subject_id,
        group_ids,
    }: AuthenticatedSubject,
    State(app_state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("Establishing WebSocket connection for subject {subject_id}");

    let max_frame_size = app_state.hub.config().max_frame_size;
    let hub = app_state.hub.clone();

    ws.max_message_size(max_frame_size)
        .max_frame_size(max_frame_size)
        .on_failed_upgrade(move |e| {
            warn!("WebSocket upgrade failed for subject {subject_id}: {e}");
        })
        .on_upgrade(move |socket| async move {
            let client = hub.register(subject_id, group_ids, WebSocketConnection::new(socket));
            debug!(
                "WebSocket connection {} established for subject {subject_id}",
                client.id()
            );
        })
}
