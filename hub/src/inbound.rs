use crate::client::ClientHandle;
use crate::message::Envelope;
use async_trait::async_trait;
use log::*;

/// Receives recognized application messages (`subscribe`, `ack`) read from clients.
///
/// Runs on the client's read pump, so implementations should hand work off
/// rather than block. A call that outlives the hub's `write_wait` is abandoned
/// and the message dropped.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, client: &ClientHandle, envelope: Envelope);
}

/// Default handler: records the message and takes no further action.
pub struct LoggingInboundHandler;

#[async_trait]
impl InboundHandler for LoggingInboundHandler {
    async fn handle(&self, client: &ClientHandle, envelope: Envelope) {
        debug!(
            "Client {} (subject {}) sent '{}' ({} bytes)",
            client.id(),
            client.subject_id(),
            envelope.message_type(),
            envelope.payload().len()
        );
    }
}
