//! One connected peer: its identity, its mailbox and the two pumps that move
//! envelopes between the mailbox and the connection.

use crate::config::HubConfig;
use crate::inbound::InboundHandler;
use crate::message::{Envelope, MessageType};
use crate::registry::ConnectionRegistry;
use crate::transport::{Connection, FrameReader, FrameWriter};
use log::*;
use std::fmt;
use std::time::Duration;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Authenticated user a client acts for.
pub type SubjectId = u64;

/// Organization (or similar membership scope) used for targeted delivery.
pub type GroupId = u64;

/// Unique identifier for a client (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Connecting,
            1 => ClientState::Active,
            2 => ClientState::Closing,
            _ => ClientState::Closed,
        }
    }
}

/// First condition that moved a client out of `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    ReadFailed,
    MalformedFrame,
    WriteFailed,
    WriteTimeout,
    HeartbeatTimeout,
    MailboxOverflow,
    Unregistered,
    Requested,
    Shutdown,
    Internal,
}

/// Result of a non-blocking mailbox insert.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Accepted,
    Full,
    Closed,
}

/// Shared view of a client held by the hub and by the client's own pumps.
///
/// The mailbox sender is the only part the hub writes through; everything else
/// is lifecycle bookkeeping.
pub struct ClientHandle {
    id: ClientId,
    subject_id: SubjectId,
    mailbox: mpsc::Sender<Envelope>,
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
    cancel: CancellationToken,
    closed: CancellationToken,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("subject_id", &self.subject_id)
            .field("state", &self.state())
            .field("close_reason", &self.close_reason())
            .finish()
    }
}

impl ClientHandle {
    /// Creates a client in `Connecting` with an empty mailbox of `capacity` envelopes.
    /// The receiver is the client's write pump's end of the mailbox.
    pub fn new(
        subject_id: SubjectId,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (mailbox, receiver) = mpsc::channel(capacity);
        let client = Arc::new(Self {
            id: ClientId::new(),
            subject_id,
            mailbox,
            state: AtomicU8::new(ClientState::Connecting as u8),
            close_reason: OnceLock::new(),
            cancel,
            closed: CancellationToken::new(),
        });
        (client, receiver)
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() < ClientState::Closing
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Envelopes currently waiting in the mailbox.
    pub fn mailbox_len(&self) -> usize {
        self.mailbox.max_capacity() - self.mailbox.capacity()
    }

    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ClientState::Connecting as u8,
                ClientState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Starts tearing the client down. Only the first call records its reason and
    /// signals the pumps; later calls return `false`.
    pub fn close(&self, reason: CloseReason) -> bool {
        let previous = self
            .state
            .fetch_max(ClientState::Closing as u8, Ordering::AcqRel);
        if previous >= ClientState::Closing as u8 {
            return false;
        }
        let _ = self.close_reason.set(reason);
        debug!("Client {} closing: {:?}", self.id, reason);
        self.cancel.cancel();
        true
    }

    /// Marks the client terminal. Returns `true` for the single call that did it.
    pub(crate) fn mark_closed(&self) -> bool {
        let previous = self
            .state
            .swap(ClientState::Closed as u8, Ordering::AcqRel);
        self.closed.cancel();
        previous != ClientState::Closed as u8
    }

    /// Resolves once both pumps have exited and the client left the hub.
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await
    }

    pub(crate) fn try_enqueue(&self, envelope: Envelope) -> Enqueue {
        if !self.is_open() {
            return Enqueue::Closed;
        }
        match self.mailbox.try_send(envelope) {
            Ok(()) => Enqueue::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Drives one client until either pump stops, then removes it from the registry.
pub(crate) async fn run<C: Connection>(
    client: Arc<ClientHandle>,
    connection: C,
    mailbox: mpsc::Receiver<Envelope>,
    registry: Arc<ConnectionRegistry>,
    inbound: Arc<dyn InboundHandler>,
    config: HubConfig,
) {
    let (reader, writer) = connection.split(config.max_frame_size);
    let (liveness_tx, liveness_rx) = watch::channel(Instant::now());

    let read_task = tokio::spawn(read_pump(
        client.clone(),
        reader,
        liveness_tx,
        inbound,
        config.write_wait,
    ));
    let write_task = tokio::spawn(write_pump(
        client.clone(),
        writer,
        mailbox,
        liveness_rx,
        config,
    ));

    let (read_result, write_result) = tokio::join!(read_task, write_task);
    for result in [read_result, write_result] {
        if let Err(e) = result {
            error!("Client {} pump terminated abnormally: {e}", client.id());
            client.close(CloseReason::Internal);
        }
    }

    registry.unregister(client.id());
    if client.mark_closed() {
        info!(
            "Client {} for subject {} closed ({:?})",
            client.id(),
            client.subject_id(),
            client.close_reason()
        );
    }
}

async fn read_pump<R: FrameReader>(
    client: Arc<ClientHandle>,
    mut reader: R,
    liveness: watch::Sender<Instant>,
    inbound: Arc<dyn InboundHandler>,
    handler_deadline: Duration,
) {
    let cancel = client.cancellation();
    let _cancel_on_exit = cancel.clone().drop_guard();

    let reason = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break CloseReason::Shutdown,
            next = reader.read_envelope() => next,
        };

        match next {
            None => break CloseReason::PeerClosed,
            Some(Err(e)) if e.is_codec() => {
                warn!("Client {} sent a malformed frame: {e}", client.id());
                break CloseReason::MalformedFrame;
            }
            Some(Err(e)) => {
                debug!("Client {} read failed: {e}", client.id());
                break CloseReason::ReadFailed;
            }
            Some(Ok(envelope)) => match envelope.message_type() {
                MessageType::Pong | MessageType::Ping => {
                    liveness.send_replace(Instant::now());
                }
                MessageType::Subscribe | MessageType::Ack => {
                    // A stalled handler must not starve pong processing.
                    let message_type = envelope.message_type().clone();
                    if time::timeout(handler_deadline, inbound.handle(&client, envelope))
                        .await
                        .is_err()
                    {
                        warn!(
                            "Inbound handler for '{message_type}' from client {} exceeded {:?}, dropped",
                            client.id(),
                            handler_deadline
                        );
                    }
                }
                MessageType::Invalidate | MessageType::Unknown(_) => {
                    warn!(
                        "Ignoring unrecognized inbound message type '{}' from client {}",
                        envelope.message_type(),
                        client.id()
                    );
                }
            },
        }
    };

    client.close(reason);
}

async fn write_pump<W: FrameWriter>(
    client: Arc<ClientHandle>,
    mut writer: W,
    mut mailbox: mpsc::Receiver<Envelope>,
    liveness: watch::Receiver<Instant>,
    config: HubConfig,
) {
    let cancel = client.cancellation();
    let _cancel_on_exit = cancel.clone().drop_guard();

    let mut heartbeat = time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::Shutdown,
            _ = heartbeat.tick() => {
                let last_seen = *liveness.borrow();
                if last_seen.elapsed() > config.pong_wait {
                    warn!(
                        "Client {} missed heartbeat, no pong for {:?}",
                        client.id(),
                        last_seen.elapsed()
                    );
                    break CloseReason::HeartbeatTimeout;
                }
                Envelope::ping()
            }
            received = mailbox.recv() => match received {
                Some(envelope) => envelope,
                None => break CloseReason::Unregistered,
            },
        };

        if let Err(reason) = write_with_deadline(&mut writer, &envelope, &config, &cancel).await {
            break reason;
        }
    };

    let first = client.close(reason);
    trace!("Client {} write pump exiting ({reason:?}, first={first})", client.id());

    if !matches!(reason, CloseReason::WriteFailed | CloseReason::WriteTimeout) {
        match time::timeout(config.write_wait, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Client {} close frame failed: {e}", client.id()),
            Err(_) => debug!("Client {} close frame timed out", client.id()),
        }
    }
}

async fn write_with_deadline<W: FrameWriter>(
    writer: &mut W,
    envelope: &Envelope,
    config: &HubConfig,
    cancel: &CancellationToken,
) -> Result<(), CloseReason> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CloseReason::Shutdown),
        written = time::timeout(config.write_wait, writer.write_envelope(envelope)) => match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!("Write failed: {e}");
                Err(CloseReason::WriteFailed)
            }
            Err(_) => Err(CloseReason::WriteTimeout),
        },
    }
}
