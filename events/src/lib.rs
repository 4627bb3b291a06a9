//! Event system infrastructure for the realtime hub.
//!
//! This crate provides the event system that enables loose coupling between
//! services that mutate shared state and infrastructure concerns (like pushing
//! cache invalidations to connected clients).
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing all cache-affecting events in the system
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. The hub crate depends on it, never the other way around.

use async_trait::async_trait;
use std::sync::Arc;

/// A type alias that represents any user or organization id.
/// Matches the subject and group id types used by the hub.
pub type Id = u64;

/// Who should hear about an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connection of one user.
    User(Id),
    /// Every connection of every member of one organization.
    Organization(Id),
    /// Every connection. Use sparingly (e.g. global maintenance notices).
    Everyone,
}

/// Domain events that represent business-level changes in the system.
/// These events are emitted after a mutation completes successfully.
///
/// The emitting service is responsible for determining the audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// Emitted when data cached by clients changed.
    /// Triggers an `invalidate` message to every connection in the audience.
    CacheInvalidated {
        audience: Audience,
        /// Logical cache partitions the clients should refetch, in order.
        query_keys: Vec<String>,
        /// Semantic event class (e.g. "feature_flags:updated"), used by clients
        /// as a fallback when `query_keys` is empty.
        event: Option<String>,
    },
    /// Emitted when a user joins or leaves an organization.
    /// Refreshes the organization memberships of the user's live connections.
    MembershipChanged {
        user_id: Id,
        /// The complete set of organizations the user belongs to now.
        organization_ids: Vec<Id>,
    },
}

/// Trait for handling domain events.
/// Implementations can perform side effects like sending notifications,
/// updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Publish an event to all registered handlers.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
