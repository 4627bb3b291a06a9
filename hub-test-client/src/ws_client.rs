use anyhow::{Context, Result};
use futures_util::stream::StreamExt;
use hub::{Envelope, InvalidationInstruction, MessageType};
use log::*;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// No frame limit on the client side; the server enforces its own.
const UNLIMITED: usize = usize::MAX;

pub struct Connection {
    pub user_label: String,
    envelope_rx: mpsc::UnboundedReceiver<Envelope>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Opens `/ws` as `subject_id`, presenting the identity headers the
    /// authentication proxy would normally inject.
    pub async fn establish(
        base_url: &str,
        subject_id: u64,
        group_ids: &[u64],
        user_label: String,
    ) -> Result<Self> {
        let url = format!("{}/ws", websocket_base_url(base_url));
        let mut request = url
            .as_str()
            .into_client_request()
            .context("Invalid WebSocket URL")?;
        let headers = request.headers_mut();
        headers.insert("x-subject-id", HeaderValue::from(subject_id));
        if !group_ids.is_empty() {
            let groups = group_ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            headers.insert("x-group-ids", HeaderValue::from_str(&groups)?);
        }

        let (mut ws_stream, _) = connect_async(request)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;
        let (tx, rx) = mpsc::unbounded_channel();

        let label = user_label.clone();
        let handle = tokio::spawn(async move {
            // Pings are answered by tungstenite while the stream is being read.
            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match Envelope::decode(&text, UNLIMITED) {
                        Ok(envelope) => {
                            if tx.send(envelope).is_err() {
                                debug!("Receiver dropped for {}", label);
                                break;
                            }
                        }
                        Err(e) => warn!("Undecodable frame for {}: {}", label, e),
                    },
                    Ok(Message::Ping(_)) => trace!("Heartbeat ping for {}", label),
                    Ok(Message::Close(frame)) => {
                        debug!("Server closed connection for {}: {:?}", label, frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error for {}: {}", label, e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            user_label,
            envelope_rx: rx,
            _handle: handle,
        })
    }

    /// Waits for the next `invalidate` envelope, skipping any other application message.
    pub async fn wait_for_invalidation(
        &mut self,
        timeout: Duration,
    ) -> Result<InvalidationInstruction> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("Timeout waiting for invalidation");
            }

            match tokio::time::timeout(remaining, self.envelope_rx.recv()).await {
                Ok(Some(envelope)) if envelope.message_type() == &MessageType::Invalidate => {
                    return Ok(envelope.payload_json()?);
                }
                Ok(Some(envelope)) => {
                    debug!(
                        "{} skipping '{}' message",
                        self.user_label,
                        envelope.message_type()
                    );
                    continue;
                }
                Ok(None) => {
                    anyhow::bail!("WebSocket connection closed");
                }
                Err(_) => {
                    anyhow::bail!("Timeout waiting for invalidation");
                }
            }
        }
    }

    /// Succeeds if no invalidation arrives within `window`.
    pub async fn expect_no_invalidation(&mut self, window: Duration) -> Result<()> {
        match self.wait_for_invalidation(window).await {
            Ok(instruction) => anyhow::bail!(
                "{} unexpectedly received invalidation {:?}",
                self.user_label,
                instruction.target_keys
            ),
            Err(_) => Ok(()),
        }
    }
}

fn websocket_base_url(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    }
}
