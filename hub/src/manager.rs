use crate::client::{self, ClientHandle, ClientId, CloseReason, GroupId, SubjectId};
use crate::config::HubConfig;
use crate::error::Result;
use crate::inbound::{InboundHandler, LoggingInboundHandler};
use crate::message::{Envelope, Message, MessageScope};
use crate::registry::ConnectionRegistry;
use crate::transport::Connection;
use log::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Process-wide registry and router of live clients.
///
/// Construct one at startup and share it behind an `Arc`. Publishing never
/// blocks and never fails; a publish with no recipients returns `0`.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    config: HubConfig,
    inbound: Arc<dyn InboundHandler>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Hub {
    /// Creates a hub without checking `config`. A zero mailbox capacity panics on
    /// the first registration; prefer `try_new` for configuration read at runtime.
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new(config.overflow_policy)),
            config,
            inbound: Arc::new(LoggingInboundHandler),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn try_new(config: HubConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Route recognized inbound application messages to `handler`.
    pub fn with_inbound_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.inbound = handler;
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a connection for an already authenticated subject and start its pumps.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register<C: Connection>(
        &self,
        subject_id: SubjectId,
        group_ids: impl IntoIterator<Item = GroupId>,
        connection: C,
    ) -> Arc<ClientHandle> {
        let (client, mailbox) = ClientHandle::new(
            subject_id,
            self.config.mailbox_capacity,
            self.shutdown.child_token(),
        );

        if self.shutdown.is_cancelled() {
            warn!("Rejecting client for subject {subject_id}: hub is shutting down");
            client.close(CloseReason::Shutdown);
            client.mark_closed();
            return client;
        }

        self.registry.register(client.clone(), group_ids);
        client.activate();

        self.tasks.spawn(client::run(
            client.clone(),
            connection,
            mailbox,
            self.registry.clone(),
            self.inbound.clone(),
            self.config.clone(),
        ));

        info!(
            "Registered client {} for subject {subject_id}",
            client.id()
        );
        client
    }

    /// Forcibly disconnect a client. Unknown or already removed clients are ignored.
    pub fn unregister(&self, client_id: &ClientId) {
        if self.registry.unregister(client_id).is_some() {
            info!("Unregistered client {client_id}");
        }
    }

    /// Replace the group memberships of a live client.
    pub fn update_groups(
        &self,
        client_id: &ClientId,
        group_ids: impl IntoIterator<Item = GroupId>,
    ) -> bool {
        let updated = self.registry.update_groups(client_id, group_ids);
        if updated {
            debug!("Updated groups for client {client_id}");
        }
        updated
    }

    /// Replace the group memberships of every live client of a subject.
    pub fn update_subject_groups(&self, subject_id: SubjectId, group_ids: &[GroupId]) -> usize {
        self.registry
            .clients_of_subject(subject_id)
            .iter()
            .filter(|client| {
                self.registry
                    .update_groups(client.id(), group_ids.iter().copied())
            })
            .count()
    }

    pub fn publish_to_user(&self, subject_id: SubjectId, envelope: Envelope) -> usize {
        let delivered = self.registry.send_to_user(subject_id, &envelope);
        trace!("Published '{}' to subject {subject_id}: {delivered} client(s)", envelope.message_type());
        delivered
    }

    pub fn publish_to_group(&self, group_id: GroupId, envelope: Envelope) -> usize {
        let delivered = self.registry.send_to_group(group_id, &envelope);
        trace!("Published '{}' to group {group_id}: {delivered} client(s)", envelope.message_type());
        delivered
    }

    pub fn broadcast(&self, envelope: Envelope) -> usize {
        let delivered = self.registry.broadcast(&envelope);
        debug!("Broadcast '{}' to {delivered} client(s)", envelope.message_type());
        delivered
    }

    /// Send a message based on its scope
    pub fn send_message(&self, message: Message) -> usize {
        match message.scope {
            MessageScope::User { subject_id } => self.publish_to_user(subject_id, message.envelope),
            MessageScope::Group { group_id } => self.publish_to_group(group_id, message.envelope),
            MessageScope::Broadcast => self.broadcast(message.envelope),
        }
    }

    pub fn client(&self, client_id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.registry.client(client_id)
    }

    pub fn groups_of(&self, client_id: &ClientId) -> Option<HashSet<GroupId>> {
        self.registry.groups_of(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn subject_client_count(&self, subject_id: SubjectId) -> usize {
        self.registry.clients_of_subject(subject_id).len()
    }

    pub fn group_member_count(&self, group_id: GroupId) -> usize {
        self.registry.members_of_group(group_id).len()
    }

    /// Number of subjects and groups with at least one live client.
    pub fn index_sizes(&self) -> (usize, usize) {
        (self.registry.subject_count(), self.registry.group_count())
    }

    /// Close every client and wait until all of their pumps have exited.
    pub async fn shutdown(&self) {
        info!(
            "Shutting down hub with {} connected client(s)",
            self.registry.len()
        );
        for client in self.registry.clients() {
            client.close(CloseReason::Shutdown);
        }
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Hub shut down");
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
