//! Message types for actor communication
//!
//! Commands are request/response messages sent to a specific actor over its
//! mpsc channel; responses come back on oneshot channels.

use tokio::sync::oneshot;

/// Commands that can be sent to the ProberActor
#[derive(Debug)]
pub enum ProberCommand {
    /// Run a full probe cycle immediately (bypassing the interval timer)
    ProbeNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Update the probe interval
    ///
    /// The new interval takes effect after the next cycle completes.
    UpdateInterval { interval_secs: u64 },

    /// Gracefully shut down the prober
    Shutdown,
}

/// Commands that can be sent to a TagMonitorActor
#[derive(Debug)]
pub enum TagMonitorCommand {
    /// Re-sync the subscription set against the registry immediately
    RefreshNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Snapshot the monitor's connection and subscription state
    GetState {
        respond_to: oneshot::Sender<MonitorState>,
    },

    /// Gracefully shut down, tearing down all subscriptions first
    Shutdown,
}

/// Connection lifecycle state of one endpoint's tag monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable state snapshot of a TagMonitorActor.
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub connection: ConnectionState,

    /// Tag ids with a live subscription (push or poll).
    pub subscribed_tags: Vec<i64>,
}
