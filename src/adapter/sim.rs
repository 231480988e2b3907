//! Simulated protocol adapter
//!
//! An in-memory implementation of the full `ConnectionAdapter` contract, so
//! the engine runs without PLC hardware. Values live in a shared map keyed by
//! protocol address; `set_value` feeds change notifications to every
//! connection subscribed to that address.
//!
//! The simulator doubles as the test double for the tag monitor: it can be
//! switched to poll-only mode, made unreachable, and forced to drop live
//! connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use crate::TagValue;

use super::{
    AdapterError, AdapterEvent, AdapterResult, ConnectionAdapter, ConnectionHandle,
    SubscriptionHandle, VarHandle,
};

#[derive(Debug)]
struct SimConnection {
    target: String,
    events: mpsc::Sender<AdapterEvent>,
    /// var handle -> address
    vars: HashMap<u32, String>,
    /// subscription handle -> var handle
    subs: HashMap<u32, u32>,
}

#[derive(Debug, Default)]
struct SimInner {
    connectable: bool,
    next_conn: u64,
    next_var: u32,
    next_sub: u32,
    values: HashMap<String, TagValue>,
    /// Addresses that fail handle creation (for fault-injection)
    broken_addresses: HashSet<String>,
    connections: HashMap<u64, SimConnection>,
}

/// Simulated PLC adapter
///
/// Cloning shares the underlying state, so a test (or the process that set
/// the simulation up) can keep a handle for driving values while the engine
/// owns another.
#[derive(Clone)]
pub struct SimulatedAdapter {
    push_notifications: bool,
    inner: Arc<Mutex<SimInner>>,
}

impl SimulatedAdapter {
    /// Adapter with push notifications (the common case).
    pub fn new() -> Self {
        Self::with_push(true)
    }

    /// Adapter that only supports `read_once`, forcing the polling fallback.
    pub fn poll_only() -> Self {
        Self::with_push(false)
    }

    fn with_push(push_notifications: bool) -> Self {
        Self {
            push_notifications,
            inner: Arc::new(Mutex::new(SimInner {
                connectable: true,
                ..Default::default()
            })),
        }
    }

    /// Set a variable's value and notify every subscription on its address.
    pub async fn set_value(&self, address: &str, value: TagValue) {
        let senders = {
            let mut inner = self.inner.lock().await;
            inner.values.insert(address.to_string(), value.clone());

            let mut senders = Vec::new();
            for conn in inner.connections.values() {
                for (sub, var) in &conn.subs {
                    if conn.vars.get(var).is_some_and(|a| a == address) {
                        senders.push((conn.events.clone(), SubscriptionHandle(*sub)));
                    }
                }
            }
            senders
        };

        for (events, subscription) in senders {
            let _ = events
                .send(AdapterEvent::ValueChanged {
                    subscription,
                    value: value.clone(),
                    timestamp: Utc::now(),
                })
                .await;
        }
    }

    /// Whether new `connect` calls succeed.
    pub async fn set_connectable(&self, connectable: bool) {
        self.inner.lock().await.connectable = connectable;
    }

    /// Make handle creation fail for an address (fault injection).
    pub async fn break_address(&self, address: &str) {
        self.inner
            .lock()
            .await
            .broken_addresses
            .insert(address.to_string());
    }

    /// Drop every live connection, delivering `ConnectionLost` to each.
    pub async fn drop_connections(&self) {
        let dropped: Vec<SimConnection> = {
            let mut inner = self.inner.lock().await;
            inner.connections.drain().map(|(_, c)| c).collect()
        };

        for conn in dropped {
            debug!("simulator dropping connection to {}", conn.target);
            let _ = conn.events.send(AdapterEvent::ConnectionLost).await;
        }
    }

    /// Number of live connections (test observability).
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Number of live push subscriptions across all connections.
    pub async fn subscription_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .connections
            .values()
            .map(|c| c.subs.len())
            .sum()
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionAdapter for SimulatedAdapter {
    async fn connect(
        &self,
        target: &str,
        events: mpsc::Sender<AdapterEvent>,
    ) -> AdapterResult<ConnectionHandle> {
        let mut inner = self.inner.lock().await;

        if !inner.connectable {
            return Err(AdapterError::Unreachable(format!(
                "simulated target {target} is down"
            )));
        }

        inner.next_conn += 1;
        let handle = inner.next_conn;
        inner.connections.insert(
            handle,
            SimConnection {
                target: target.to_string(),
                events,
                vars: HashMap::new(),
                subs: HashMap::new(),
            },
        );

        trace!("simulator connected to {target} (handle {handle})");
        Ok(ConnectionHandle(handle))
    }

    async fn disconnect(&self, conn: ConnectionHandle) -> AdapterResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .connections
            .remove(&conn.0)
            .map(|c| trace!("simulator disconnected from {}", c.target))
            .ok_or_else(|| AdapterError::Protocol(format!("unknown connection {}", conn.0)))
    }

    async fn create_variable_handle(
        &self,
        conn: ConnectionHandle,
        address: &str,
    ) -> AdapterResult<VarHandle> {
        let mut inner = self.inner.lock().await;

        if inner.broken_addresses.contains(address) {
            return Err(AdapterError::Protocol(format!(
                "symbol not found: {address}"
            )));
        }

        // Unseeded addresses come up as FALSE, like a fresh PLC boot
        inner
            .values
            .entry(address.to_string())
            .or_insert(TagValue::Bool(false));

        inner.next_var += 1;
        let var = inner.next_var;

        let connection = inner
            .connections
            .get_mut(&conn.0)
            .ok_or_else(|| AdapterError::Protocol(format!("unknown connection {}", conn.0)))?;
        connection.vars.insert(var, address.to_string());

        Ok(VarHandle(var))
    }

    async fn release_variable_handle(
        &self,
        conn: ConnectionHandle,
        var: VarHandle,
    ) -> AdapterResult<()> {
        let mut inner = self.inner.lock().await;
        let connection = inner
            .connections
            .get_mut(&conn.0)
            .ok_or_else(|| AdapterError::Protocol(format!("unknown connection {}", conn.0)))?;

        connection.vars.remove(&var.0);
        Ok(())
    }

    fn supports_subscriptions(&self) -> bool {
        self.push_notifications
    }

    async fn subscribe(
        &self,
        conn: ConnectionHandle,
        var: VarHandle,
    ) -> AdapterResult<SubscriptionHandle> {
        if !self.push_notifications {
            return Err(AdapterError::Unsupported("push subscriptions"));
        }

        let (events, sub, value) = {
            let mut inner = self.inner.lock().await;
            inner.next_sub += 1;
            let sub = inner.next_sub;

            let connection = inner
                .connections
                .get_mut(&conn.0)
                .ok_or_else(|| AdapterError::Protocol(format!("unknown connection {}", conn.0)))?;

            let address = connection
                .vars
                .get(&var.0)
                .cloned()
                .ok_or_else(|| AdapterError::Protocol(format!("unknown variable {}", var.0)))?;
            connection.subs.insert(sub, var.0);
            let events = connection.events.clone();

            let value = inner.values.get(&address).cloned();
            (events, sub, value)
        };

        // Initial value delivered as the first notification (ADS behavior)
        if let Some(value) = value {
            let _ = events
                .send(AdapterEvent::ValueChanged {
                    subscription: SubscriptionHandle(sub),
                    value,
                    timestamp: Utc::now(),
                })
                .await;
        }

        Ok(SubscriptionHandle(sub))
    }

    async fn unsubscribe(
        &self,
        conn: ConnectionHandle,
        subscription: SubscriptionHandle,
    ) -> AdapterResult<()> {
        let mut inner = self.inner.lock().await;
        let connection = inner
            .connections
            .get_mut(&conn.0)
            .ok_or_else(|| AdapterError::Protocol(format!("unknown connection {}", conn.0)))?;

        connection.subs.remove(&subscription.0);
        Ok(())
    }

    async fn read_once(&self, conn: ConnectionHandle, var: VarHandle) -> AdapterResult<TagValue> {
        let inner = self.inner.lock().await;
        let connection = inner
            .connections
            .get(&conn.0)
            .ok_or_else(|| AdapterError::Protocol(format!("unknown connection {}", conn.0)))?;

        let address = connection
            .vars
            .get(&var.0)
            .ok_or_else(|| AdapterError::Protocol(format!("unknown variable {}", var.0)))?;

        inner
            .values
            .get(address)
            .cloned()
            .ok_or_else(|| AdapterError::Protocol(format!("no value for {address}")))
    }
}
