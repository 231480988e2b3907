//! Connection adapter contract
//!
//! The engine never speaks a PLC protocol directly. Any client (ADS, OPC UA,
//! Modbus, ...) plugs in behind the `ConnectionAdapter` trait; the tag
//! monitor's connection lifecycle and subscription logic stay unchanged.
//!
//! ## Event delivery
//!
//! A connection carries one event channel, handed to the adapter at
//! `connect`. Value changes arrive on it keyed by subscription handle (the
//! way ADS delivers device notifications), and connection loss arrives as
//! `AdapterEvent::ConnectionLost` on the same channel. Adapters without push
//! support report `supports_subscriptions() == false` and are polled through
//! `read_once` instead.

pub mod sim;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::TagValue;

/// Opaque handle for one live protocol connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Opaque handle for a resolved variable (tag address) on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarHandle(pub u32);

/// Opaque handle for a change-notification registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u32);

/// Events delivered on a connection's event channel.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// A subscribed variable changed (or was read for the first time).
    ValueChanged {
        subscription: SubscriptionHandle,
        value: TagValue,
        timestamp: DateTime<Utc>,
    },

    /// The connection dropped. No further events follow; all handles for
    /// this connection are dead.
    ConnectionLost,
}

/// Result type alias for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors a protocol adapter can surface
#[derive(Debug)]
pub enum AdapterError {
    /// Target not reachable (connect/reconnect failures - retried on schedule)
    Unreachable(String),

    /// Malformed or unsupported read/subscribe (tag skipped, connection kept)
    Protocol(String),

    /// Operation not supported by this adapter (e.g. push subscriptions)
    Unsupported(&'static str),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::Unreachable(msg) => write!(f, "target unreachable: {}", msg),
            AdapterError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            AdapterError::Unsupported(what) => write!(f, "not supported by adapter: {}", what),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Contract a protocol client must satisfy to slot into the engine.
///
/// Implementations must be `Send + Sync`; one adapter instance serves all
/// endpoints and may hold any number of concurrent connections.
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    /// Open a connection to `target`. Events for this connection are pushed
    /// into `events` until `disconnect` or connection loss.
    async fn connect(
        &self,
        target: &str,
        events: mpsc::Sender<AdapterEvent>,
    ) -> AdapterResult<ConnectionHandle>;

    /// Close a connection. Remaining variable/subscription handles are
    /// implicitly invalidated.
    async fn disconnect(&self, conn: ConnectionHandle) -> AdapterResult<()>;

    /// Resolve a protocol address to a variable handle.
    async fn create_variable_handle(
        &self,
        conn: ConnectionHandle,
        address: &str,
    ) -> AdapterResult<VarHandle>;

    /// Release a variable handle.
    async fn release_variable_handle(
        &self,
        conn: ConnectionHandle,
        var: VarHandle,
    ) -> AdapterResult<()>;

    /// Whether this adapter can push change notifications. When `false`, the
    /// tag monitor falls back to polling `read_once` at each tag's scan
    /// interval.
    fn supports_subscriptions(&self) -> bool;

    /// Register for change notifications on a variable. The current value is
    /// delivered immediately as the first `ValueChanged` event.
    async fn subscribe(
        &self,
        conn: ConnectionHandle,
        var: VarHandle,
    ) -> AdapterResult<SubscriptionHandle>;

    /// Drop a change-notification registration.
    async fn unsubscribe(
        &self,
        conn: ConnectionHandle,
        subscription: SubscriptionHandle,
    ) -> AdapterResult<()>;

    /// One-shot read of a variable's current value.
    async fn read_once(&self, conn: ConnectionHandle, var: VarHandle) -> AdapterResult<TagValue>;
}
