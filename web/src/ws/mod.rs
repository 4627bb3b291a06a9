//! WebSocket HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the upgrade endpoint.
//! The connection hub itself (Hub, ConnectionRegistry, client pumps)
//! lives in the `hub` crate to avoid circular dependencies.

pub mod handler;
