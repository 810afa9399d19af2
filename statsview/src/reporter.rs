//! Periodic export of view snapshots to [`Sink`]s.
//!
//! A [`Reporter`] ticks every [`ViewManager::reporting_period`], takes a snapshot and hands it to
//! each sink. Every sink has a single-slot mailbox: if a sink is still busy with a previous
//! snapshot when the next tick arrives, the undelivered snapshot is replaced by the newer one and
//! counted in [`ReporterStats::overwritten`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, warn};

use crate::{manager::ViewManager, sink::Sink, snapshot::Snapshot};

/// Exports snapshots of a [`ViewManager`] to sinks on a fixed cadence.
#[derive(Debug)]
pub struct Reporter;

impl Reporter {
    /// Start configuring a reporter for the views of `manager`.
    pub fn builder(manager: &ViewManager) -> ReporterBuilder {
        ReporterBuilder { manager: manager.clone(), sinks: Vec::new() }
    }
}

/// A builder for a [`Reporter`].
#[derive(Debug)]
pub struct ReporterBuilder {
    manager: ViewManager,
    sinks: Vec<Arc<dyn Sink>>,
}

impl ReporterBuilder {
    /// Add a sink.
    pub fn with_sink(mut self, sink: impl Sink) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add a sink that is shared with other owners.
    pub fn with_shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Start reporting in the background.
    ///
    /// # Behavior
    /// - If a Tokio runtime is available, use it to spawn the reporter.
    /// - Otherwise, spawn a new single-threaded Tokio runtime on a thread, and run the reporter
    ///   there.
    ///
    /// The reporter stops when [`ReporterHandle::shutdown`] is called or the handle is dropped.
    pub fn start(self) -> std::io::Result<ReporterHandle> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let stats = Arc::new(ReporterStats::default());

        let fut = run(self.manager, self.sinks, Arc::clone(&stats), stop_rx, done_tx);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(fut);
        } else {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

            thread::Builder::new()
                .name("statsview-reporter".to_owned())
                .spawn(move || runtime.block_on(fut))?;
        }

        Ok(ReporterHandle { stop: Some(stop_tx), done: done_rx, stats })
    }
}

/// Controls a running reporter.
#[derive(Debug)]
pub struct ReporterHandle {
    stop: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<()>,
    stats: Arc<ReporterStats>,
}

impl ReporterHandle {
    /// Counters describing the reporter's activity so far.
    pub fn stats(&self) -> &ReporterStats {
        &self.stats
    }

    /// Stop ticking and wait for in-flight sink writes to finish. Snapshots that were not yet
    /// picked up by their sink are dropped.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.done).await;
    }
}

/// Counters maintained by a running reporter.
#[derive(Debug, Default)]
pub struct ReporterStats {
    ticks: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    overwritten: AtomicU64,
}

impl ReporterStats {
    /// Snapshots taken.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Successful sink writes.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Failed sink writes.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Snapshots replaced in a sink's mailbox before the sink picked them up.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Holds at most one pending snapshot for a sink.
#[derive(Debug, Default)]
struct Mailbox {
    slot: Mutex<Option<Arc<Snapshot>>>,
    closed: AtomicBool,
    notify: Notify,
}

impl Mailbox {
    /// Returns `true` if an undelivered snapshot was replaced.
    fn put(&self, snapshot: Arc<Snapshot>) -> bool {
        let replaced = self.slot.lock().replace(snapshot).is_some();
        self.notify.notify_one();
        replaced
    }

    async fn take(&self) -> Option<Arc<Snapshot>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(snapshot) = self.slot.lock().take() {
                return Some(snapshot);
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

async fn run(
    manager: ViewManager,
    sinks: Vec<Arc<dyn Sink>>,
    stats: Arc<ReporterStats>,
    mut stop: oneshot::Receiver<()>,
    done: oneshot::Sender<()>,
) {
    let mut mailboxes = Vec::with_capacity(sinks.len());
    let mut deliveries = Vec::with_capacity(sinks.len());
    for sink in sinks {
        let mailbox = Arc::new(Mailbox::default());
        deliveries.push(tokio::spawn(deliver(sink, Arc::clone(&mailbox), Arc::clone(&stats))));
        mailboxes.push(mailbox);
    }

    info!(sinks = mailboxes.len(), period = ?manager.reporting_period(), "Reporter started");

    loop {
        // Read at every tick boundary so period changes apply from the next tick.
        let period = manager.reporting_period();
        tokio::select! {
            // Either an explicit stop or a dropped handle.
            _ = &mut stop => break,
            _ = tokio::time::sleep(period) => {}
        }

        let snapshot = Arc::new(manager.snapshot());
        stats.ticks.fetch_add(1, Ordering::Relaxed);

        for mailbox in &mailboxes {
            if mailbox.put(Arc::clone(&snapshot)) {
                stats.overwritten.fetch_add(1, Ordering::Relaxed);
                debug!("Sink still busy, dropped undelivered snapshot");
            }
        }
    }

    for mailbox in &mailboxes {
        mailbox.close();
    }
    for delivery in deliveries {
        let _ = delivery.await;
    }

    info!("Reporter stopped");
    let _ = done.send(());
}

async fn deliver(sink: Arc<dyn Sink>, mailbox: Arc<Mailbox>, stats: Arc<ReporterStats>) {
    while let Some(snapshot) = mailbox.take().await {
        let writer = Arc::clone(&sink);
        match tokio::task::spawn_blocking(move || writer.write(&snapshot)).await {
            Ok(Ok(())) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(?sink, error = %e, "Failed to write snapshot");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(?sink, error = %e, "Sink write panicked");
            }
        }
    }
}
