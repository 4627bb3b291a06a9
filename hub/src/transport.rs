//! Transport abstraction the client pumps run on.
//!
//! A `Connection` is split once into an independent reader and writer so the
//! read pump and write pump never share state. Two implementations ship with
//! the crate: `WebSocketConnection` for axum upgrades and `ChannelConnection`
//! for in-process peers (tests, embedders, bridges).

use crate::error::{CodecErrorKind, Error, ErrorKind, Result, TransportErrorKind};
use crate::message::{Envelope, Kind};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Waits for the next frame. Returns `None` once the peer has closed the connection.
    async fn read_envelope(&mut self) -> Option<Result<Envelope>>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_envelope(&mut self, envelope: &Envelope) -> Result<()>;

    /// Tells the peer the connection is going away.
    async fn close(&mut self) -> Result<()>;
}

/// A bidirectional, ordered, message-framed transport owned by exactly one client.
pub trait Connection: Send + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    /// Splits the connection; the reader rejects frames above `max_frame_size` bytes.
    fn split(self, max_frame_size: usize) -> (Self::Reader, Self::Writer);
}

fn write_error(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Error {
    Error::with_source(ErrorKind::Transport(TransportErrorKind::Write), err)
}

/// An upgraded axum WebSocket.
///
/// Heartbeat envelopes travel as WebSocket ping/pong control frames; all other
/// envelopes are JSON text frames.
pub struct WebSocketConnection {
    socket: WebSocket,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl From<WebSocket> for WebSocketConnection {
    fn from(socket: WebSocket) -> Self {
        Self::new(socket)
    }
}

pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
    max_frame_size: usize,
}

pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
}

impl Connection for WebSocketConnection {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn split(self, max_frame_size: usize) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketReader {
                stream,
                max_frame_size,
            },
            WebSocketWriter { sink },
        )
    }
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn read_envelope(&mut self) -> Option<Result<Envelope>> {
        match self.stream.next().await? {
            Ok(Message::Text(text)) => Some(Envelope::decode(&text, self.max_frame_size)),
            Ok(Message::Binary(bytes)) => Some(
                std::str::from_utf8(&bytes)
                    .map_err(|e| Error::with_source(ErrorKind::Codec(CodecErrorKind::Malformed), e))
                    .and_then(|text| Envelope::decode(text, self.max_frame_size)),
            ),
            // axum answers protocol pings itself; a ping still proves the peer is alive.
            Ok(Message::Ping(_)) => Some(Ok(Envelope::ping())),
            Ok(Message::Pong(_)) => Some(Ok(Envelope::pong())),
            Ok(Message::Close(_)) => None,
            Err(e) => Some(Err(Error::from(e))),
        }
    }
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let message = match envelope.kind() {
            Kind::HeartbeatPing => Message::Ping(Vec::new()),
            Kind::HeartbeatPong => Message::Pong(Vec::new()),
            Kind::Application => Message::Text(envelope.encode()?),
        };
        self.sink.send(message).await.map_err(write_error)
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.send(Message::Close(None)).await.map_err(write_error)?;
        self.sink.close().await.map_err(write_error)
    }
}

/// An in-process connection carrying encoded text frames over channels.
pub struct ChannelConnection {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
}

/// The remote end of a `ChannelConnection`.
pub struct ChannelPeer {
    to_client: mpsc::Sender<String>,
    from_client: mpsc::Receiver<String>,
}

/// Creates a connected pair. `capacity` bounds frames in flight in each direction,
/// so a peer that stops reading eventually stalls the client's writes.
pub fn channel_pair(capacity: usize) -> (ChannelConnection, ChannelPeer) {
    let (to_client, inbound) = mpsc::channel(capacity);
    let (outbound, from_client) = mpsc::channel(capacity);
    (
        ChannelConnection { inbound, outbound },
        ChannelPeer {
            to_client,
            from_client,
        },
    )
}

pub struct ChannelReader {
    inbound: mpsc::Receiver<String>,
    max_frame_size: usize,
}

pub struct ChannelWriter {
    outbound: mpsc::Sender<String>,
}

impl Connection for ChannelConnection {
    type Reader = ChannelReader;
    type Writer = ChannelWriter;

    fn split(self, max_frame_size: usize) -> (Self::Reader, Self::Writer) {
        (
            ChannelReader {
                inbound: self.inbound,
                max_frame_size,
            },
            ChannelWriter {
                outbound: self.outbound,
            },
        )
    }
}

#[async_trait]
impl FrameReader for ChannelReader {
    async fn read_envelope(&mut self) -> Option<Result<Envelope>> {
        let frame = self.inbound.recv().await?;
        Some(Envelope::decode(&frame, self.max_frame_size))
    }
}

#[async_trait]
impl FrameWriter for ChannelWriter {
    async fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.encode()?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| Error::transport(TransportErrorKind::Closed))
    }

    async fn close(&mut self) -> Result<()> {
        // The peer observes the close once the writer is dropped.
        Ok(())
    }
}

impl ChannelPeer {
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.send_raw(envelope.encode()?).await
    }

    /// Sends a frame verbatim, without validating it.
    pub async fn send_raw(&self, frame: impl Into<String>) -> Result<()> {
        self.to_client
            .send(frame.into())
            .await
            .map_err(|_| Error::transport(TransportErrorKind::Closed))
    }

    /// Next envelope written by the client, `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<Result<Envelope>> {
        let frame = self.from_client.recv().await?;
        Some(Envelope::decode(&frame, usize::MAX))
    }

    /// Returns an already-buffered envelope without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        let frame = self.from_client.try_recv().ok()?;
        Envelope::decode(&frame, usize::MAX).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[tokio::test]
    async fn channel_pair_carries_envelopes_both_ways() {
        let (connection, mut peer) = channel_pair(4);
        let (mut reader, mut writer) = connection.split(1024);

        peer.send(&Envelope::pong()).await.unwrap();
        let inbound = reader.read_envelope().await.unwrap().unwrap();
        assert_eq!(inbound, Envelope::pong());

        let ack = Envelope::application(MessageType::Ack, r#"{"id":1}"#).unwrap();
        writer.write_envelope(&ack).await.unwrap();
        assert_eq!(peer.recv().await.unwrap().unwrap(), ack);
    }

    #[tokio::test]
    async fn channel_reader_reports_malformed_and_closed() {
        let (connection, peer) = channel_pair(4);
        let (mut reader, _writer) = connection.split(1024);

        peer.send_raw("not json").await.unwrap();
        let err = reader.read_envelope().await.unwrap().unwrap_err();
        assert!(err.is_codec());

        drop(peer);
        assert!(reader.read_envelope().await.is_none());
    }

    #[tokio::test]
    async fn channel_writer_fails_once_peer_is_gone() {
        let (connection, peer) = channel_pair(1);
        let (_reader, mut writer) = connection.split(1024);
        drop(peer);

        let err = writer.write_envelope(&Envelope::ping()).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::Closed)
        );
    }
}
