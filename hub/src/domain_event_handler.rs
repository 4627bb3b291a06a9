use crate::message::{Envelope, InvalidationInstruction, Message, MessageScope};
use crate::Hub;
use async_trait::async_trait;
use events::{Audience, DomainEvent, EventHandler};
use log::*;
use std::sync::Arc;

/// Handles domain events by turning them into hub traffic.
///
/// This handler is responsible for:
/// 1. Converting cache invalidation events into `invalidate` envelopes
/// 2. Routing them to the audience named in the event
/// 3. Refreshing organization memberships of live connections
pub struct HubDomainEventHandler {
    hub: Arc<Hub>,
}

impl HubDomainEventHandler {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

fn scope_for(audience: &Audience) -> MessageScope {
    match audience {
        Audience::User(user_id) => MessageScope::User {
            subject_id: *user_id,
        },
        Audience::Organization(organization_id) => MessageScope::Group {
            group_id: *organization_id,
        },
        Audience::Everyone => MessageScope::Broadcast,
    }
}

#[async_trait]
impl EventHandler for HubDomainEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::CacheInvalidated {
                audience,
                query_keys,
                event,
            } => {
                let instruction = InvalidationInstruction::new(query_keys.clone(), event.clone());
                let envelope = match Envelope::invalidation(&instruction) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        error!("Failed to serialize invalidation instruction: {e}");
                        return;
                    }
                };

                let delivered = self.hub.send_message(Message {
                    envelope,
                    scope: scope_for(audience),
                });

                debug!(
                    "Sent invalidation {:?} to {:?}: {} client(s)",
                    query_keys, audience, delivered
                );
            }

            DomainEvent::MembershipChanged {
                user_id,
                organization_ids,
            } => {
                let updated = self
                    .hub
                    .update_subject_groups(*user_id, organization_ids);
                debug!(
                    "Refreshed organizations of user {} on {} client(s)",
                    user_id, updated
                );
            }
        }
    }
}
