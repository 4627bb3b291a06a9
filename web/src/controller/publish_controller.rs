use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::params::publish::{PublishParams, PublishResponse};
use crate::{AppState, Error};
use hub::{Envelope, InvalidationInstruction, Message};
use log::*;

/// POST an invalidation to the connected clients named by `scope`.
///
/// Responds with the number of clients whose mailbox accepted the envelope.
/// Zero is a success: the audience may simply be offline.
pub async fn publish(
    State(app_state): State<AppState>,
    Json(params): Json<PublishParams>,
) -> Result<impl IntoResponse, Error> {
    debug!(
        "POST publish invalidation {:?} to {:?}",
        params.invalidation.target_keys, params.scope
    );

    let mut instruction = params.invalidation;
    if instruction.occurred_at == 0 {
        instruction = InvalidationInstruction::new(instruction.target_keys, instruction.event_tag);
    }

    let envelope = Envelope::invalidation(&instruction)?;
    let delivered = app_state.hub.send_message(Message {
        envelope,
        scope: params.scope,
    });

    info!("Published invalidation to {delivered} client(s)");

    Ok((StatusCode::OK, Json(PublishResponse { delivered })))
}
