//! ProberActor - Determines endpoint reachability and latency
//!
//! ICMP is frequently blocked on industrial networks, so a probe races plain
//! TCP handshakes against a fixed list of commonly open ports instead. The
//! first completed handshake wins and its elapsed time is the endpoint's
//! latency; if every attempt fails or the overall deadline passes, the
//! endpoint is offline.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → probe all endpoints → UptimeSample + status upsert → alerts
//!     ↑
//!     └─── Commands (ProbeNow, UpdateInterval, Shutdown)
//! ```
//!
//! Probe cycles are independent and idempotent; a single endpoint's failure
//! never aborts the cycle or the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::MonitorConfig;
use crate::registry::EndpointRegistry;
use crate::storage::schema::{Alert, AlertKind, UptimeSample};
use crate::storage::{StorageBackend, StorageResult};
use crate::{Endpoint, EndpointStatus};

use super::messages::ProberCommand;

/// Outcome of probing one endpoint.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub is_online: bool,
    /// Handshake time of the winning port; unset when offline.
    pub latency_ms: Option<u64>,
    /// Diagnostic for the last failed attempt; unset when online.
    pub error: Option<String>,
}

impl ProbeResult {
    fn offline(error: impl Into<String>) -> Self {
        Self {
            is_online: false,
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Race TCP handshakes against `ports` on `address`.
///
/// Every network error resolves to an offline result with a diagnostic
/// string; this function never fails.
pub async fn probe_address(
    address: &str,
    ports: &[u16],
    attempt_timeout: Duration,
    deadline: Duration,
) -> ProbeResult {
    if address.trim().is_empty() {
        return ProbeResult::offline("empty endpoint address");
    }
    if ports.is_empty() {
        return ProbeResult::offline("no probe ports configured");
    }

    let mut attempts: FuturesUnordered<_> = ports
        .iter()
        .map(|&port| async move {
            let started = Instant::now();
            match timeout(attempt_timeout, TcpStream::connect((address, port))).await {
                Ok(Ok(_stream)) => Ok((port, started.elapsed())),
                Ok(Err(e)) => Err(format!("port {port}: {e}")),
                Err(_) => Err(format!("port {port}: timed out")),
            }
        })
        .collect();

    let race = async {
        let mut last_error = None;
        while let Some(result) = attempts.next().await {
            match result {
                Ok((port, elapsed)) => {
                    trace!("{address}:{port} answered in {elapsed:?}");
                    return ProbeResult {
                        is_online: true,
                        latency_ms: Some(elapsed.as_millis() as u64),
                        error: None,
                    };
                }
                Err(e) => last_error = Some(e),
            }
        }
        ProbeResult::offline(last_error.unwrap_or_else(|| "no ports attempted".to_string()))
    };

    match timeout(deadline, race).await {
        Ok(result) => result,
        Err(_) => ProbeResult::offline(format!("probe deadline of {deadline:?} exceeded")),
    }
}

/// Actor that probes every registered endpoint on a fixed interval
///
/// Cycles are stateless; alert suppression comes from the unresolved-alert
/// lookup in storage, so a restart cannot double-alert.
pub struct ProberActor {
    registry: Arc<dyn EndpointRegistry>,
    storage: Arc<dyn StorageBackend>,
    config: MonitorConfig,
    command_rx: mpsc::Receiver<ProberCommand>,
    interval_duration: Duration,
}

impl ProberActor {
    pub fn new(
        registry: Arc<dyn EndpointRegistry>,
        storage: Arc<dyn StorageBackend>,
        config: MonitorConfig,
        command_rx: mpsc::Receiver<ProberCommand>,
    ) -> Self {
        let interval_duration = Duration::from_secs(config.probe_interval_secs);

        Self {
            registry,
            storage,
            config,
            command_rx,
            interval_duration,
        }
    }

    /// Run the actor's main loop
    ///
    /// The interval's first tick completes immediately, which gives the
    /// required probe-at-startup before the fixed cycle begins.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting prober actor");

        let mut ticker = interval(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.probe_cycle().await {
                        error!("probe cycle failed: {:#}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ProberCommand::ProbeNow { respond_to }) => {
                            debug!("received ProbeNow command");
                            let result = self.probe_cycle().await;
                            let _ = respond_to.send(result);
                        }

                        Some(ProberCommand::UpdateInterval { interval_secs }) => {
                            debug!("updating probe interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs);
                            ticker = interval(self.interval_duration);
                        }

                        Some(ProberCommand::Shutdown) => {
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

        debug!("prober actor stopped");
    }

    /// Probe every endpoint in the current registry snapshot.
    ///
    /// Probes run concurrently; storage writes are applied sequentially
    /// afterwards.
    #[instrument(skip(self))]
    async fn probe_cycle(&mut self) -> Result<()> {
        let endpoints = self
            .registry
            .list_endpoints()
            .await
            .context("failed to list endpoints")?;

        trace!("probing {} endpoints", endpoints.len());

        let attempt_timeout = self.config.probe_attempt_timeout();
        let deadline = self.config.probe_deadline();
        let ports = self.config.probe_ports.clone();

        let probes = endpoints
            .iter()
            .filter(|endpoint| {
                if endpoint.address.trim().is_empty() {
                    warn!("skipping {}: no address configured", endpoint.name);
                    return false;
                }
                true
            })
            .map(|endpoint| {
                let ports = &ports;
                async move {
                    let result =
                        probe_address(&endpoint.address, ports, attempt_timeout, deadline).await;
                    (endpoint, result)
                }
            });

        for (endpoint, result) in futures::future::join_all(probes).await {
            self.record_result(endpoint, result).await;
        }

        Ok(())
    }

    /// Persist one probe result and raise alerts as needed.
    #[instrument(skip(self, endpoint, result), fields(endpoint = %endpoint.name))]
    async fn record_result(&self, endpoint: &Endpoint, result: ProbeResult) {
        let now = Utc::now();
        let status = if result.is_online {
            EndpointStatus::Online
        } else {
            EndpointStatus::Offline
        };

        log_write_error(
            self.storage
                .record_uptime_sample(UptimeSample {
                    endpoint_id: endpoint.id,
                    timestamp: now,
                    is_online: result.is_online,
                    latency_ms: result.latency_ms,
                })
                .await,
            "uptime sample",
        );

        log_write_error(
            self.storage
                .update_endpoint_status(endpoint.id, status, result.latency_ms, now)
                .await,
            "endpoint status",
        );

        if status == EndpointStatus::Offline {
            self.raise_offline_alert(endpoint, result.error.as_deref())
                .await;
        }

        if let Some(latency) = result.latency_ms
            && latency > self.config.latency_warning_ms
        {
            // Unlike offline alerts (one ongoing condition, deduplicated
            // over a window), every exceeding cycle is an independent
            // measurement and is reported each time.
            debug!("high latency: {latency}ms");
            log_write_error(
                self.storage
                    .create_alert(Alert::high_latency(
                        endpoint,
                        latency,
                        self.config.latency_warning_ms,
                    ))
                    .await
                    .map(|_| ()),
                "high latency alert",
            );
        }
    }

    /// Raise a critical offline alert unless an equivalent unresolved alert
    /// exists within the dedup window.
    async fn raise_offline_alert(&self, endpoint: &Endpoint, error: Option<&str>) {
        let window = self.config.offline_dedup_window();

        match self
            .storage
            .find_recent_unresolved_alert(endpoint.id, AlertKind::EndpointOffline, window)
            .await
        {
            Ok(Some(existing)) => {
                debug!(
                    "suppressing offline alert, unresolved alert {} from {} is within the dedup window",
                    existing.id.unwrap_or_default(),
                    existing.created_at
                );
            }
            Ok(None) => {
                warn!("{} went offline", endpoint.name);
                log_write_error(
                    self.storage
                        .create_alert(Alert::endpoint_offline(endpoint, error))
                        .await
                        .map(|_| ()),
                    "offline alert",
                );
            }
            Err(e) => {
                error!("dedup lookup failed, skipping offline alert: {e}");
            }
        }
    }
}

fn log_write_error(result: StorageResult<()>, what: &str) {
    if let Err(e) = result {
        error!("failed to persist {what}: {e}");
    }
}

/// Handle for controlling the ProberActor
#[derive(Clone)]
pub struct ProberHandle {
    sender: mpsc::Sender<ProberCommand>,
}

impl ProberHandle {
    /// Spawn the prober as a tokio task and return a handle to it.
    pub fn spawn(
        registry: Arc<dyn EndpointRegistry>,
        storage: Arc<dyn StorageBackend>,
        config: MonitorConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ProberActor::new(registry, storage, config, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a probe cycle immediately, bypassing the interval timer.
    pub async fn probe_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProberCommand::ProbeNow { respond_to: tx })
            .await
            .context("failed to send ProbeNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    /// Update the probe interval.
    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(ProberCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    /// Gracefully shut down the prober.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ProberCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
