//! TagMonitorActor - Per-endpoint connection and subscription management
//!
//! One actor per endpoint owns that endpoint's protocol connection, the set
//! of live tag subscriptions, and the in-memory last value per tag. The
//! connection moves through `Disconnected -> Connecting -> Connected`;
//! subscriptions exist only while `Connected`.
//!
//! ## Timers
//!
//! - **Reconnect** (default 30s): retries the connection while disconnected
//!   and at least one active tag exists.
//! - **Refresh** (default 60s): diffs the subscription set against the
//!   registry, picking up activated/deactivated tags.
//!
//! Tags on adapters without push support are polled at their scan interval
//! by a dedicated task that feeds the same event channel, so evaluation is
//! identical either way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};

use crate::MonitoredTag;
use crate::adapter::{AdapterEvent, ConnectionAdapter, ConnectionHandle, SubscriptionHandle, VarHandle};
use crate::config::MonitorConfig;
use crate::registry::EndpointRegistry;
use crate::storage::StorageBackend;
use crate::Endpoint;

use super::evaluator::AlarmEvaluator;
use super::messages::{ConnectionState, MonitorState, TagMonitorCommand};

/// Live subscription for one tag.
struct Subscription {
    var: VarHandle,
    kind: SubscriptionKind,
}

enum SubscriptionKind {
    /// Adapter pushes change notifications under this handle.
    Push(SubscriptionHandle),

    /// Polled by a spawned task that reports under a synthetic handle.
    Poll {
        key: SubscriptionHandle,
        task: JoinHandle<()>,
    },
}

/// Actor owning one endpoint's connection, subscriptions and last values
pub struct TagMonitorActor {
    endpoint: Endpoint,
    registry: Arc<dyn EndpointRegistry>,
    adapter: Arc<dyn ConnectionAdapter>,
    evaluator: AlarmEvaluator,
    config: MonitorConfig,
    command_rx: mpsc::Receiver<TagMonitorCommand>,

    event_tx: mpsc::Sender<AdapterEvent>,
    event_rx: mpsc::Receiver<AdapterEvent>,

    state: ConnectionState,
    conn: Option<ConnectionHandle>,

    /// Active tags from the last registry refresh, by tag id.
    tags: HashMap<i64, MonitoredTag>,
    subscriptions: HashMap<i64, Subscription>,
    /// Subscription handle (real or synthetic) back to tag id.
    routes: HashMap<SubscriptionHandle, i64>,
    /// Normalized last value per tag, seeding the alarm edge detection.
    last_values: HashMap<i64, String>,

    /// Synthetic handles for poll tasks start high to stay clear of the
    /// adapter's own handle space.
    next_poll_key: u32,
}

impl TagMonitorActor {
    pub fn new(
        endpoint: Endpoint,
        registry: Arc<dyn EndpointRegistry>,
        adapter: Arc<dyn ConnectionAdapter>,
        storage: Arc<dyn StorageBackend>,
        config: MonitorConfig,
        command_rx: mpsc::Receiver<TagMonitorCommand>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            endpoint,
            registry,
            adapter,
            evaluator: AlarmEvaluator::new(storage),
            config,
            command_rx,
            event_tx,
            event_rx,
            state: ConnectionState::Disconnected,
            conn: None,
            tags: HashMap::new(),
            subscriptions: HashMap::new(),
            routes: HashMap::new(),
            last_values: HashMap::new(),
            next_poll_key: 0x8000_0000,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self), fields(endpoint = %self.endpoint.name))]
    pub async fn run(mut self) {
        debug!("starting tag monitor");

        if let Err(e) = self.refresh().await {
            warn!("initial refresh failed: {:#}", e);
        }

        let mut reconnect = interval(self.config.reconnect_interval());
        let mut refresh = interval(self.config.refresh_interval());
        // Swallow the immediate first tick of both timers; the initial
        // refresh above already connected if there was anything to do.
        reconnect.tick().await;
        refresh.tick().await;

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.handle_adapter_event(event).await;
                }

                _ = reconnect.tick(), if self.state == ConnectionState::Disconnected
                    && !self.tags.is_empty() =>
                {
                    debug!("reconnect attempt");
                    self.connect().await;
                }

                _ = refresh.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!("refresh failed: {:#}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(TagMonitorCommand::RefreshNow { respond_to }) => {
                            debug!("received RefreshNow command");
                            let result = self.refresh().await;
                            let _ = respond_to.send(result);
                        }

                        Some(TagMonitorCommand::GetState { respond_to }) => {
                            let _ = respond_to.send(self.snapshot());
                        }

                        Some(TagMonitorCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.disconnect().await;
        debug!("tag monitor stopped");
    }

    fn snapshot(&self) -> MonitorState {
        let mut subscribed: Vec<i64> = self.subscriptions.keys().copied().collect();
        subscribed.sort_unstable();

        MonitorState {
            connection: self.state,
            subscribed_tags: subscribed,
        }
    }

    /// Diff the subscription set against the registry's active tags.
    ///
    /// Also drives the connection lifecycle: connects when tags appear while
    /// disconnected, disconnects when the last active tag goes away.
    #[instrument(skip(self), fields(endpoint = %self.endpoint.name))]
    async fn refresh(&mut self) -> Result<()> {
        let desired = self
            .registry
            .list_active_tags(Some(self.endpoint.id))
            .await
            .context("failed to list active tags")?;

        trace!("refresh: {} active tags", desired.len());

        let stale: Vec<i64> = self
            .subscriptions
            .keys()
            .copied()
            .filter(|id| !desired.iter().any(|tag| tag.id == *id))
            .collect();
        for tag_id in stale {
            debug!("tag {tag_id} no longer active, unsubscribing");
            self.unsubscribe_tag(tag_id, true).await;
        }

        self.tags.retain(|id, _| desired.iter().any(|tag| tag.id == *id));
        self.last_values.retain(|id, _| self.tags.contains_key(id));

        for tag in desired {
            // Carry a persisted last value into the edge detection so a
            // restart does not re-fire on an unchanged signal
            if !self.last_values.contains_key(&tag.id)
                && let Some(last) = &tag.last_value
            {
                self.last_values.insert(tag.id, last.clone());
            }
            self.tags.insert(tag.id, tag);
        }

        match self.state {
            ConnectionState::Connected => {
                if self.tags.is_empty() {
                    debug!("no active tags remain, disconnecting");
                    self.disconnect().await;
                } else {
                    self.subscribe_missing().await;
                }
            }
            ConnectionState::Disconnected if !self.tags.is_empty() => {
                self.connect().await;
            }
            _ => {}
        }

        Ok(())
    }

    /// Establish the connection and subscribe all known tags.
    ///
    /// A failed attempt logs and returns to `Disconnected`; the reconnect
    /// timer retries. Offline alerting belongs to the prober, not here.
    async fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }

        self.state = ConnectionState::Connecting;
        trace!("connecting to {}", self.endpoint.address);

        match self
            .adapter
            .connect(&self.endpoint.address, self.event_tx.clone())
            .await
        {
            Ok(conn) => {
                debug!("connected to {}", self.endpoint.address);
                self.conn = Some(conn);
                self.state = ConnectionState::Connected;
                self.subscribe_missing().await;
            }
            Err(e) => {
                warn!("connection to {} failed: {e}", self.endpoint.address);
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    /// Tear down all subscriptions and close the connection.
    async fn disconnect(&mut self) {
        self.teardown_subscriptions(true).await;

        if let Some(conn) = self.conn.take()
            && let Err(e) = self.adapter.disconnect(conn).await
        {
            trace!("disconnect failed: {e}");
        }

        self.state = ConnectionState::Disconnected;
    }

    async fn subscribe_missing(&mut self) {
        let mut missing: Vec<i64> = self
            .tags
            .keys()
            .copied()
            .filter(|id| !self.subscriptions.contains_key(id))
            .collect();
        missing.sort_unstable();

        for tag_id in missing {
            self.subscribe_tag(tag_id).await;
        }
    }

    /// Subscribe one tag. A per-tag failure is logged and skipped; it never
    /// takes the connection or the other tags down.
    async fn subscribe_tag(&mut self, tag_id: i64) {
        let Some(conn) = self.conn else {
            return;
        };
        let Some(tag) = self.tags.get(&tag_id).cloned() else {
            return;
        };

        let var = match self.adapter.create_variable_handle(conn, &tag.address).await {
            Ok(var) => var,
            Err(e) => {
                warn!("failed to resolve tag '{}' ({}): {e}", tag.name, tag.address);
                return;
            }
        };

        if self.adapter.supports_subscriptions() {
            match self.adapter.subscribe(conn, var).await {
                Ok(sub) => {
                    trace!("subscribed tag '{}' ({:?})", tag.name, sub);
                    self.routes.insert(sub, tag_id);
                    self.subscriptions.insert(
                        tag_id,
                        Subscription {
                            var,
                            kind: SubscriptionKind::Push(sub),
                        },
                    );
                }
                Err(e) => {
                    warn!("failed to subscribe tag '{}': {e}", tag.name);
                    let _ = self.adapter.release_variable_handle(conn, var).await;
                }
            }
        } else {
            let key = SubscriptionHandle(self.next_poll_key);
            self.next_poll_key += 1;

            let period = Duration::from_millis(
                tag.scan_interval_ms
                    .unwrap_or(self.config.default_scan_interval_ms),
            );
            let task = spawn_poll_task(self.adapter.clone(), conn, var, key, period, self.event_tx.clone());

            trace!("polling tag '{}' every {period:?}", tag.name);
            self.routes.insert(key, tag_id);
            self.subscriptions.insert(
                tag_id,
                Subscription {
                    var,
                    kind: SubscriptionKind::Poll { key, task },
                },
            );
        }
    }

    /// Remove one tag's subscription. `release` is false after connection
    /// loss, when the remote handles are already dead.
    async fn unsubscribe_tag(&mut self, tag_id: i64, release: bool) {
        let Some(Subscription { var, kind }) = self.subscriptions.remove(&tag_id) else {
            return;
        };

        match kind {
            SubscriptionKind::Push(sub) => {
                self.routes.remove(&sub);
                if release && let Some(conn) = self.conn {
                    let _ = self.adapter.unsubscribe(conn, sub).await;
                }
            }
            SubscriptionKind::Poll { key, task } => {
                task.abort();
                self.routes.remove(&key);
            }
        }

        if release && let Some(conn) = self.conn {
            let _ = self.adapter.release_variable_handle(conn, var).await;
        }
    }

    async fn teardown_subscriptions(&mut self, release: bool) {
        let ids: Vec<i64> = self.subscriptions.keys().copied().collect();
        for tag_id in ids {
            self.unsubscribe_tag(tag_id, release).await;
        }
    }

    /// Process one adapter event. Events are handled strictly in order by
    /// the select loop, which keeps per-tag evaluation sequential.
    async fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::ValueChanged {
                subscription,
                value,
                timestamp,
            } => {
                let Some(&tag_id) = self.routes.get(&subscription) else {
                    // Buffered event from a subscription torn down meanwhile
                    trace!("dropping event for unknown subscription {subscription:?}");
                    return;
                };
                let Some(tag) = self.tags.get(&tag_id).cloned() else {
                    return;
                };

                let old = self.last_values.get(&tag_id).cloned();
                if let Some(committed) = self
                    .evaluator
                    .evaluate(&tag, old.as_deref(), &value, timestamp)
                    .await
                {
                    self.last_values.insert(tag_id, committed);
                }
            }

            AdapterEvent::ConnectionLost => {
                warn!("connection to {} lost", self.endpoint.name);
                self.teardown_subscriptions(false).await;
                self.conn = None;
                self.state = ConnectionState::Disconnected;
            }
        }
    }
}

/// Poll a variable at a fixed interval, reporting values under a synthetic
/// subscription handle. Read failures are transient by assumption; loss of
/// the connection surfaces as `ConnectionLost` on the shared channel.
fn spawn_poll_task(
    adapter: Arc<dyn ConnectionAdapter>,
    conn: ConnectionHandle,
    var: VarHandle,
    key: SubscriptionHandle,
    period: Duration,
    events: mpsc::Sender<AdapterEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);

        loop {
            ticker.tick().await;

            match adapter.read_once(conn, var).await {
                Ok(value) => {
                    let event = AdapterEvent::ValueChanged {
                        subscription: key,
                        value,
                        timestamp: Utc::now(),
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    trace!("poll read failed: {e}");
                }
            }
        }
    })
}

/// Handle for controlling a TagMonitorActor
#[derive(Clone)]
pub struct TagMonitorHandle {
    sender: mpsc::Sender<TagMonitorCommand>,
}

impl TagMonitorHandle {
    /// Spawn a tag monitor for `endpoint` as a tokio task.
    pub fn spawn(
        endpoint: Endpoint,
        registry: Arc<dyn EndpointRegistry>,
        adapter: Arc<dyn ConnectionAdapter>,
        storage: Arc<dyn StorageBackend>,
        config: MonitorConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = TagMonitorActor::new(endpoint, registry, adapter, storage, config, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Re-sync the subscription set against the registry immediately.
    pub async fn refresh_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TagMonitorCommand::RefreshNow { respond_to: tx })
            .await
            .context("failed to send RefreshNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    /// Snapshot the monitor's connection and subscription state.
    pub async fn state(&self) -> Result<MonitorState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TagMonitorCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down, tearing down subscriptions and the connection.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(TagMonitorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
