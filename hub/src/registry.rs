use crate::client::{ClientHandle, ClientId, CloseReason, Enqueue, GroupId, SubjectId};
use crate::config::OverflowPolicy;
use crate::message::Envelope;
use dashmap::DashMap;
use log::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Connection information (no redundant client_id)
struct ConnectionInfo {
    client: Arc<ClientHandle>,
    group_ids: HashSet<GroupId>,
}

/// Client registry with a primary store and two secondary indices.
///
/// No guard on one map is held while another map is touched, except in
/// `update_groups`, which always locks `connections` before `group_index`.
/// Recipients are snapshotted before any mailbox insert.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by client_id for registration/cleanup - O(1)
    connections: DashMap<ClientId, ConnectionInfo>,

    /// Secondary index: subject_id -> that subject's live clients - O(1)
    subject_index: DashMap<SubjectId, HashSet<ClientId>>,

    /// Secondary index: group_id -> member subjects, counted per client naming the group
    group_index: DashMap<GroupId, HashMap<SubjectId, usize>>,

    overflow_policy: OverflowPolicy,
}

impl ConnectionRegistry {
    pub fn new(overflow_policy: OverflowPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            subject_index: DashMap::new(),
            group_index: DashMap::new(),
            overflow_policy,
        }
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Register a client under its subject and every group in `group_ids` - O(g)
    pub fn register(&self, client: Arc<ClientHandle>, group_ids: impl IntoIterator<Item = GroupId>) {
        let client_id = client.id().clone();
        let subject_id = client.subject_id();
        let group_ids: HashSet<GroupId> = group_ids.into_iter().collect();

        for group_id in &group_ids {
            self.join_group(*group_id, subject_id);
        }

        self.connections.insert(
            client_id.clone(),
            ConnectionInfo {
                client,
                group_ids,
            },
        );

        self.subject_index
            .entry(subject_id)
            .or_default()
            .insert(client_id);
    }

    /// Remove a client from every index and close it. Unknown ids are a no-op.
    pub fn unregister(&self, client_id: &ClientId) -> Option<Arc<ClientHandle>> {
        let (_, info) = self.connections.remove(client_id)?;
        let subject_id = info.client.subject_id();

        if let Some(mut clients) = self.subject_index.get_mut(&subject_id) {
            clients.remove(client_id);
        }
        // Clean up empty subject entries atomically with respect to new registrations
        self.subject_index
            .remove_if(&subject_id, |_, clients| clients.is_empty());

        for group_id in &info.group_ids {
            self.leave_group(*group_id, subject_id);
        }

        info.client.close(CloseReason::Unregistered);
        Some(info.client)
    }

    /// Replace a client's group memberships. Returns `false` for unknown clients.
    pub fn update_groups(
        &self,
        client_id: &ClientId,
        group_ids: impl IntoIterator<Item = GroupId>,
    ) -> bool {
        let Some(mut info) = self.connections.get_mut(client_id) else {
            return false;
        };
        let subject_id = info.client.subject_id();
        let new_groups: HashSet<GroupId> = group_ids.into_iter().collect();

        for group_id in info.group_ids.difference(&new_groups) {
            self.leave_group(*group_id, subject_id);
        }
        for group_id in new_groups.difference(&info.group_ids) {
            self.join_group(*group_id, subject_id);
        }

        info.group_ids = new_groups;
        true
    }

    fn join_group(&self, group_id: GroupId, subject_id: SubjectId) {
        *self
            .group_index
            .entry(group_id)
            .or_default()
            .entry(subject_id)
            .or_insert(0) += 1;
    }

    fn leave_group(&self, group_id: GroupId, subject_id: SubjectId) {
        if let Some(mut members) = self.group_index.get_mut(&group_id) {
            if let Some(count) = members.get_mut(&subject_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    members.remove(&subject_id);
                }
            }
        }
        self.group_index
            .remove_if(&group_id, |_, members| members.is_empty());
    }

    pub fn client(&self, client_id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.connections
            .get(client_id)
            .map(|info| info.client.clone())
    }

    pub fn groups_of(&self, client_id: &ClientId) -> Option<HashSet<GroupId>> {
        self.connections
            .get(client_id)
            .map(|info| info.group_ids.clone())
    }

    pub fn clients(&self) -> Vec<Arc<ClientHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().client.clone())
            .collect()
    }

    pub fn clients_of_subject(&self, subject_id: SubjectId) -> Vec<Arc<ClientHandle>> {
        let client_ids: Vec<ClientId> = match self.subject_index.get(&subject_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };

        client_ids
            .iter()
            .filter_map(|client_id| self.client(client_id))
            .collect()
    }

    pub fn members_of_group(&self, group_id: GroupId) -> Vec<SubjectId> {
        self.group_index
            .get(&group_id)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn subject_count(&self) -> usize {
        self.subject_index.len()
    }

    pub fn group_count(&self) -> usize {
        self.group_index.len()
    }

    /// Send to every client of a subject - O(1) lookup + O(k) enqueue
    pub fn send_to_user(&self, subject_id: SubjectId, envelope: &Envelope) -> usize {
        self.deliver_all(self.clients_of_subject(subject_id), envelope)
    }

    /// Send to every client of every member subject of a group
    pub fn send_to_group(&self, group_id: GroupId, envelope: &Envelope) -> usize {
        let recipients: Vec<Arc<ClientHandle>> = self
            .members_of_group(group_id)
            .into_iter()
            .flat_map(|subject_id| self.clients_of_subject(subject_id))
            .collect();
        self.deliver_all(recipients, envelope)
    }

    /// Broadcast to all clients - O(n) (unavoidable, but explicit)
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        self.deliver_all(self.clients(), envelope)
    }

    fn deliver_all(&self, recipients: Vec<Arc<ClientHandle>>, envelope: &Envelope) -> usize {
        recipients
            .iter()
            .filter(|client| self.deliver(client, envelope))
            .count()
    }

    /// Non-blocking insert into one mailbox, applying the overflow policy when it is full.
    fn deliver(&self, client: &Arc<ClientHandle>, envelope: &Envelope) -> bool {
        match client.try_enqueue(envelope.clone()) {
            Enqueue::Accepted => true,
            Enqueue::Closed => false,
            Enqueue::Full => {
                match self.overflow_policy {
                    OverflowPolicy::DropNewest => {
                        warn!(
                            "Mailbox full for client {} (subject {}), dropping '{}' envelope",
                            client.id(),
                            client.subject_id(),
                            envelope.message_type()
                        );
                    }
                    OverflowPolicy::Disconnect => {
                        warn!(
                            "Mailbox full for client {} (subject {}), disconnecting",
                            client.id(),
                            client.subject_id()
                        );
                        client.close(CloseReason::MailboxOverflow);
                        self.unregister(client.id());
                    }
                }
                false
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(OverflowPolicy::default())
    }
}
