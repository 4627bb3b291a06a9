//! Real-time connection hub for pushing cache invalidations to connected clients.
//!
//! This crate holds many long-lived client connections open, tracks which
//! subject (user) and groups (organizations) each connection belongs to, and
//! routes events to the right subset of connections with bounded memory.
//!
//! # Architecture
//!
//! - **Three-index registry**: connections by id, clients by subject and
//!   subjects by group, each a DashMap. Group membership is refcounted per
//!   subject so a subject with several clients stays a member until its last
//!   client in that group leaves.
//! - **Two pumps per client**: a read pump that decodes inbound frames and
//!   tracks liveness, and a write pump that is the only writer to the
//!   transport. It drains a bounded mailbox and emits heartbeats.
//! - **Non-blocking publish**: publishers never wait on a client. A full
//!   mailbox resolves through the configured `OverflowPolicy`.
//! - **Ephemeral messages**: offline subjects miss events and refetch on
//!   their next connection.
//!
//! # Message Flow
//!
//! 1. A client upgrades to a WebSocket at `/ws` after authentication
//! 2. The web layer calls `Hub::register` with the subject and its groups
//! 3. A service mutates data and publishes a `DomainEvent`
//! 4. `HubDomainEventHandler` turns it into an `invalidate` envelope
//! 5. The Hub enqueues it into the mailbox of every matching client
//! 6. Each write pump sends it within the write deadline
//!
//! # Example: Sending an invalidation
//!
//! ```rust,ignore
//! use hub::{Envelope, InvalidationInstruction, Message, MessageScope};
//!
//! let envelope = Envelope::invalidation(&InvalidationInstruction::for_keys(["settings"]))?;
//! let delivered = app_state.hub.send_message(Message {
//!     envelope,
//!     scope: MessageScope::Group { group_id: organization_id },
//! });
//! ```
//!
//! # Modules
//!
//! - `client`: ClientHandle, its lifecycle and the read/write pumps
//! - `registry`: ConnectionRegistry with subject and group indices
//! - `manager`: The Hub, which owns the registry and spawns pumps
//! - `message`: Envelope wire codec, message types and scopes
//! - `transport`: Frame reader/writer seam with WebSocket and in-memory transports
//! - `invalidation`: Consumer-side mapping of invalidation instructions
//! - `domain_event_handler`: Adapter from domain events to hub traffic

pub mod client;
pub mod config;
pub mod domain_event_handler;
pub mod error;
pub mod inbound;
pub mod invalidation;
pub mod manager;
pub mod message;
pub mod registry;
pub mod transport;

pub use client::{ClientHandle, ClientId, ClientState, CloseReason, GroupId, SubjectId};
pub use config::{HubConfig, OverflowPolicy};
pub use domain_event_handler::HubDomainEventHandler;
pub use error::{Error, Result};
pub use inbound::InboundHandler;
pub use invalidation::InvalidationResolver;
pub use manager::Hub;
pub use message::{Envelope, InvalidationInstruction, Kind, Message, MessageScope, MessageType};
pub use transport::{channel_pair, Connection, WebSocketConnection};
