//! The agent's event loop
//!
//! [`EventLoop`] owns the registry for its whole lifetime. One
//! `tokio::select!` pulls the next message from one of three sources and
//! runs its handler to completion before looking again:
//!
//! - capture readiness, one stream per monitor, keyed by monitor index
//! - monitors whose last drain stopped on a capture error, drained again
//! - the export timer, when an exporter is configured
//! - query requests sent through a [`QueryClient`]
//!
//! Nothing else touches the registry, so it needs no locking.

use crate::capture::CaptureBackend;
use crate::error::{AgentError, Result};
use crate::exporter::{ExportError, Exporter};
use crate::lifecycle::{open_monitor, MonitorError, ReadinessStream};
use crate::monitor::{Monitor, MonitorDefinition};
use crate::query::{MibView, QueryError};
use crate::registry::{Registry, RegistryError};
use log::{debug, error, info, trace, warn};
use pcapmib_common::{MonitorRow, Oid, VarBind};
use std::collections::BTreeSet;
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;

const QUERY_CHANNEL_CAPACITY: usize = 64;

/// A request served by the event loop
#[derive(Debug)]
pub enum QueryRequest {
    Get {
        oid: Oid,
        reply: oneshot::Sender<std::result::Result<VarBind, QueryError>>,
    },
    GetNext {
        oid: Oid,
        reply: oneshot::Sender<std::result::Result<VarBind, QueryError>>,
    },
    Walk {
        root: Oid,
        reply: oneshot::Sender<Vec<VarBind>>,
    },
    Row {
        index: u32,
        reply: oneshot::Sender<std::result::Result<MonitorRow, RegistryError>>,
    },
    NextRow {
        index: u32,
        reply: oneshot::Sender<std::result::Result<MonitorRow, RegistryError>>,
    },
    Status {
        reply: oneshot::Sender<LoopStatus>,
    },
}

/// Table-wide totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStatus {
    pub monitors: u32,
    pub seen_octets: u64,
    pub seen_packets: u64,
    pub drain_errors: u64,
}

/// Handle for querying a running event loop from other tasks
#[derive(Debug, Clone)]
pub struct QueryClient {
    tx: mpsc::Sender<QueryRequest>,
}

impl QueryClient {
    async fn call<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> QueryRequest) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(request(reply))
            .await
            .map_err(|_| AgentError::LoopClosed)?;
        response.await.map_err(|_| AgentError::LoopClosed)
    }

    pub async fn get(&self, oid: Oid) -> Result<VarBind> {
        Ok(self.call(|reply| QueryRequest::Get { oid, reply }).await??)
    }

    pub async fn get_next(&self, oid: Oid) -> Result<VarBind> {
        Ok(self.call(|reply| QueryRequest::GetNext { oid, reply }).await??)
    }

    pub async fn walk(&self, root: Oid) -> Result<Vec<VarBind>> {
        self.call(|reply| QueryRequest::Walk { root, reply }).await
    }

    pub async fn row(&self, index: u32) -> Result<MonitorRow> {
        Ok(self.call(|reply| QueryRequest::Row { index, reply }).await??)
    }

    pub async fn next_row(&self, index: u32) -> Result<MonitorRow> {
        Ok(self.call(|reply| QueryRequest::NextRow { index, reply }).await??)
    }

    pub async fn status(&self) -> Result<LoopStatus> {
        self.call(|reply| QueryRequest::Status { reply }).await
    }
}

/// Single-threaded dispatcher owning the monitor table
pub struct EventLoop<B: CaptureBackend> {
    // Declared before `registry`: readiness watchers go away before the
    // handles they watch.
    watchers: StreamMap<u32, ReadinessStream>,
    registry: Registry<Monitor<B::Handle>>,
    backend: B,
    base: Oid,
    exporter: Option<(Exporter, Duration)>,
    queries: mpsc::Receiver<QueryRequest>,
    client: QueryClient,
    // Readiness is consumed before draining, so frames left behind by a
    // failed drain only get read through here.
    redrain: BTreeSet<u32>,
    drain_errors: u64,
}

impl<B: CaptureBackend> EventLoop<B> {
    pub fn new(backend: B, base: Oid) -> Self {
        let (tx, queries) = mpsc::channel(QUERY_CHANNEL_CAPACITY);
        Self {
            watchers: StreamMap::new(),
            registry: Registry::new(),
            backend,
            base,
            exporter: None,
            queries,
            client: QueryClient { tx },
            redrain: BTreeSet::new(),
            drain_errors: 0,
        }
    }

    /// Write a snapshot through `exporter` every `period`
    pub fn with_exporter(mut self, exporter: Exporter, period: Duration) -> Self {
        self.exporter = Some((exporter, period));
        self
    }

    pub fn client(&self) -> QueryClient {
        self.client.clone()
    }

    pub fn base(&self) -> &Oid {
        &self.base
    }

    pub fn registry(&self) -> &Registry<Monitor<B::Handle>> {
        &self.registry
    }

    pub fn view(&self) -> MibView<'_, B::Handle> {
        MibView::new(&self.base, &self.registry)
    }

    /// Open, watch and register one monitor
    ///
    /// Must be called inside the tokio runtime the loop will run on.
    pub fn add_monitor(
        &mut self,
        def: &MonitorDefinition,
    ) -> std::result::Result<(), MonitorError> {
        if def.index == 0 {
            return Err(MonitorError::InvalidIndex(def.index));
        }
        if self.registry.contains(def.index) {
            return Err(RegistryError::DuplicateIndex(def.index).into());
        }

        let (monitor, readiness) = open_monitor(&self.backend, def)?;
        info!(
            "Monitor {} ('{}') capturing on {}",
            def.index,
            monitor.description(),
            monitor.device()
        );
        self.registry.insert(monitor)?;
        self.watchers.insert(def.index, readiness);
        Ok(())
    }

    /// Create a monitor for every definition
    ///
    /// A definition that fails is logged and skipped. Returns the number of
    /// monitors added.
    pub fn load(&mut self, defs: &[MonitorDefinition]) -> usize {
        let mut added = 0;
        for def in defs {
            match self.add_monitor(def) {
                Ok(()) => added += 1,
                Err(e) => error!("{}", e),
            }
        }
        info!("Loaded {} of {} monitor definitions", added, defs.len());
        added
    }

    /// Stop watching a monitor, then release it
    ///
    /// Returns the monitor's final row.
    pub fn remove_monitor(
        &mut self,
        index: u32,
    ) -> std::result::Result<MonitorRow, RegistryError> {
        if !self.registry.contains(index) {
            return Err(RegistryError::NotFound(index));
        }

        self.watchers.remove(&index);
        self.redrain.remove(&index);
        let monitor = self.registry.remove(index)?;
        let row = monitor.row();
        drop(monitor);

        debug!(
            "Monitor {} removed ({} octets, {} packets)",
            index, row.seen_octets, row.seen_packets
        );
        Ok(row)
    }

    pub fn status(&self) -> LoopStatus {
        let mut status = LoopStatus {
            monitors: u32::try_from(self.registry.len()).unwrap_or(u32::MAX),
            drain_errors: self.drain_errors,
            ..LoopStatus::default()
        };
        for monitor in self.registry.iter() {
            let counters = monitor.counters();
            status.seen_octets = status.seen_octets.saturating_add(counters.seen_octets);
            status.seen_packets = status.seen_packets.saturating_add(counters.seen_packets);
        }
        status
    }

    /// Write one snapshot, if an exporter is configured
    pub fn export(&self) -> std::result::Result<(), ExportError> {
        let Some((exporter, _)) = &self.exporter else {
            return Ok(());
        };
        let rows = self.view().rows();
        exporter.export(&rows)?;
        trace!("Exported {} rows to {}", rows.len(), exporter.path().display());
        Ok(())
    }

    fn on_readable(&mut self, index: u32, ready: io::Result<()>) {
        if let Err(e) = ready {
            self.drain_errors += 1;
            warn!("Monitor {}: readiness error: {}", index, e);
            return;
        }

        self.drain(index, false);
    }

    /// Count the frames pending on one monitor
    ///
    /// A drain that stops on a capture error is queued to run again. A
    /// repeated drain that fails without counting anything is not requeued;
    /// the monitor then waits for its next readiness.
    fn drain(&mut self, index: u32, repeated: bool) {
        let Ok(monitor) = self.registry.get_mut(index) else {
            self.redrain.remove(&index);
            debug!("Readiness for unknown monitor {}", index);
            return;
        };

        let before = monitor.counters().seen_packets;
        match monitor.drain() {
            Ok(counted) => {
                self.redrain.remove(&index);
                trace!("Monitor {}: {} frames", index, counted);
            }
            Err(e) => {
                let progressed = monitor.counters().seen_packets != before;
                self.drain_errors += 1;
                warn!("Monitor {}: capture error: {}", index, e);
                if !repeated || progressed {
                    self.redrain.insert(index);
                } else {
                    self.redrain.remove(&index);
                }
            }
        }
    }

    fn on_query(&self, request: QueryRequest) {
        let view = self.view();
        // A requester that went away no longer needs its answer.
        match request {
            QueryRequest::Get { oid, reply } => {
                let _ = reply.send(view.get(&oid));
            }
            QueryRequest::GetNext { oid, reply } => {
                let _ = reply.send(view.get_next(&oid));
            }
            QueryRequest::Walk { root, reply } => {
                let _ = reply.send(view.walk(&root));
            }
            QueryRequest::Row { index, reply } => {
                let _ = reply.send(view.row(index));
            }
            QueryRequest::NextRow { index, reply } => {
                let _ = reply.send(view.next_row(index));
            }
            QueryRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Remove every monitor in ascending index order
    pub fn shutdown(&mut self) {
        let indices: Vec<u32> = self.registry.indices().collect();
        for index in indices {
            if let Err(e) = self.remove_monitor(index) {
                warn!("Monitor {}: {}", index, e);
            }
        }
    }

    /// Dispatch until `shutdown` is cancelled or an export fails
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let mut export_timer = self.exporter.as_ref().map(|(exporter, period)| {
            info!(
                "Exporting {} snapshots to {} every {:?}",
                exporter.format(),
                exporter.path().display(),
                period
            );
            let mut timer = tokio::time::interval_at(Instant::now() + *period, *period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        info!("Event loop running with {} monitors", self.registry.len());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                Some((index, ready)) = self.watchers.next() => {
                    self.on_readable(index, ready);
                }
                Some(index) = std::future::ready(self.redrain.first().copied()) => {
                    self.drain(index, true);
                }
                _ = tick(&mut export_timer) => {
                    if let Err(e) = self.export() {
                        error!("{}", e);
                        self.shutdown();
                        return Err(e.into());
                    }
                }
                Some(request) = self.queries.recv() => {
                    self.on_query(request);
                }
            }
        }

        self.shutdown();
        info!("Event loop stopped");
        Ok(())
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
