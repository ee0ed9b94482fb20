//! Producer loop: fetch → normalize → reconcile → commit, on a fixed
//! start-to-start interval.
//!
//! Cycles never overlap. A cycle that outlasts the interval is followed
//! immediately by the next one. Shutdown only interrupts the wait between
//! cycles; a running cycle (commit retries included) always completes.

use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::FLIGHTSYNC_CORE_VERSION;
use crate::commit::BatchCommitter;
use crate::feed::FeedSource;
use crate::normalize::normalize_snapshot;
use crate::reconcile::reconcile;
use crate::store::DocumentStore;
use crate::types::{CycleReport, SyncConfig};
use crate::Result;

pub struct SyncEngine<F, S> {
    feed: F,
    store: S,
    config: SyncConfig,
    committer: BatchCommitter,
    cycles: u64,
}

impl<F, S> SyncEngine<F, S>
where
    F: FeedSource,
    S: DocumentStore,
{
    /// Fails with `InvalidConfig` when `config` does not validate.
    pub fn new(feed: F, store: S, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let committer = BatchCommitter::from_config(&config);
        Ok(Self {
            feed,
            store,
            config,
            committer,
            cycles: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Cycles started so far, failed ones included.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one full cycle. A fetch, decode, or known-set read failure ends the
    /// cycle with that error and leaves the store untouched; chunk failures are
    /// reported inside the returned `CycleReport`.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycles += 1;
        let cycle = self.cycles;
        let started_at = Utc::now();
        let start = Instant::now();

        let snapshot = self.feed.fetch()?;
        let normalized = normalize_snapshot(&snapshot, self.config.duplicate_policy);
        let known = self.store.list_ids()?;
        let partition = reconcile(&normalized.entities, &known);
        let commit = self
            .committer
            .commit(&self.store, &partition, &normalized.entities);

        let report = CycleReport {
            cycle,
            started_at,
            duration: start.elapsed(),
            fetched_records: snapshot.states.len(),
            malformed_records: normalized.rejected.len(),
            duplicate_records: normalized.duplicates,
            known_ids: known.len(),
            to_add: partition.to_add.len(),
            to_update: partition.to_update.len(),
            to_remove: partition.to_remove.len(),
            suppressed_adds: partition.suppressed_adds.len(),
            commit,
        };
        tracing::info!(
            target: "flightsync::engine",
            cycle,
            cycle.fetched = report.fetched_records,
            cycle.malformed = report.malformed_records,
            cycle.added = report.to_add,
            cycle.updated = report.to_update,
            cycle.removed = report.to_remove,
            cycle.failed_chunks = report.commit.failed_chunks().count(),
            cycle.elapsed_ms = duration_ms(report.duration),
            "sync cycle complete"
        );
        Ok(report)
    }

    /// Authenticate, then run cycles until `shutdown` yields a value or its
    /// sender is dropped. `observer` sees every successful cycle's report.
    ///
    /// Returns an error only for fatal conditions (authentication at startup).
    pub fn run<O>(&mut self, shutdown: &Receiver<()>, mut observer: O) -> Result<()>
    where
        O: FnMut(&CycleReport),
    {
        if let Err(err) = self.store.authenticate() {
            tracing::error!(target: "flightsync::engine", error = %err, "store authentication failed");
            return Err(err);
        }
        let interval = self.config.poll_interval();
        log::info!(
            "flightsync-core {FLIGHTSYNC_CORE_VERSION}: syncing collection '{}' every {}ms",
            self.config.collection,
            duration_ms(interval)
        );

        loop {
            let tick = Instant::now();
            match self.run_cycle() {
                Ok(report) => observer(&report),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        target: "flightsync::engine",
                        cycle = self.cycles,
                        error = %err,
                        "sync cycle failed, waiting for next tick"
                    );
                }
            }

            let elapsed = tick.elapsed();
            if elapsed >= interval {
                tracing::warn!(
                    target: "flightsync::engine",
                    cycle = self.cycles,
                    cycle.elapsed_ms = duration_ms(elapsed),
                    interval_ms = duration_ms(interval),
                    "cycle overran poll interval"
                );
                match shutdown.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => continue,
                }
            }
            match shutdown.recv_timeout(interval - elapsed) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        tracing::info!(target: "flightsync::engine", cycles = self.cycles, "sync engine stopped");
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
