//! Chunked, concurrent, retried application of a `Partition` to a store.
//!
//! Every partition is split into `ceil(n / max_batch_size)` chunks; each chunk
//! becomes one atomic `WriteBatch`. Chunks are independent: a chunk that keeps
//! failing after its retries is recorded in the report and never stops its
//! siblings. The commit phase returns only once every chunk has settled.

use std::thread;
use std::time::Instant;

use crossbeam_channel::unbounded;

use crate::constants::MAX_BATCH_SIZE;
use crate::reconcile::{create_payload, update_payload};
use crate::store::{DocumentStore, WriteBatch, WriteOp};
use crate::types::{
    BatchKind, ChunkOutcome, ChunkStatus, CommitReport, EntityId, EntitySnapshot, Partition,
    RetryPolicy, SyncConfig,
};

/// One unit of work for the pool.
#[derive(Debug, Clone)]
struct ChunkJob {
    kind: BatchKind,
    chunk_index: usize,
    batch: WriteBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCommitter {
    max_batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
}

impl Default for BatchCommitter {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl BatchCommitter {
    /// `max_batch_size` is clamped to `1..=500`, `concurrency` to at least 1.
    #[must_use]
    pub fn new(max_batch_size: usize, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            max_batch_size: max_batch_size.clamp(1, MAX_BATCH_SIZE),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_batch_size, config.concurrency, config.retry)
    }

    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Number of chunks a list of `operations` ids is split into.
    #[must_use]
    pub fn chunk_count(&self, operations: usize) -> usize {
        operations.div_ceil(self.max_batch_size)
    }

    /// Commit every chunk of `partition` and wait for all of them.
    pub fn commit<S>(
        &self,
        store: &S,
        partition: &Partition,
        snapshot: &EntitySnapshot,
    ) -> CommitReport
    where
        S: DocumentStore + ?Sized,
    {
        let start = Instant::now();
        let (jobs, unresolved_ids) = self.plan(partition, snapshot);
        if jobs.is_empty() {
            return CommitReport {
                chunks: Vec::new(),
                unresolved_ids,
            };
        }

        let workers = self.concurrency.min(jobs.len());
        let (job_tx, job_rx) = unbounded::<ChunkJob>();
        let (outcome_tx, outcome_rx) = unbounded::<ChunkOutcome>();
        for job in jobs {
            // receiver is alive until the scope below ends
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                scope.spawn(move || {
                    for job in job_rx {
                        let outcome = self.run_chunk(store, &job);
                        if outcome_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(outcome_tx);

        let mut chunks: Vec<ChunkOutcome> = outcome_rx.into_iter().collect();
        chunks.sort_by_key(|chunk| (chunk.kind, chunk.chunk_index));
        let report = CommitReport {
            chunks,
            unresolved_ids,
        };

        let failed = report.failed_chunks().count();
        if failed > 0 {
            tracing::warn!(
                target: "flightsync::commit",
                chunks = report.chunks.len(),
                commit.failed = failed,
                commit.operations = report.committed_operations(),
                "commit phase finished with failed chunks"
            );
        } else {
            tracing::debug!(
                target: "flightsync::commit",
                chunks = report.chunks.len(),
                commit.operations = report.committed_operations(),
                commit.workers = workers,
                commit.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "commit phase finished"
            );
        }
        report
    }

    fn plan(&self, partition: &Partition, snapshot: &EntitySnapshot) -> (Vec<ChunkJob>, usize) {
        let mut jobs = Vec::new();
        let mut unresolved = 0usize;

        for (chunk_index, ids) in partition.to_add.chunks(self.max_batch_size).enumerate() {
            let mut batch = WriteBatch::with_capacity(ids.len());
            for &id in ids {
                match snapshot.get(id).and_then(create_payload) {
                    Some(document) => batch.push(WriteOp::Create { document }),
                    None => {
                        unresolved += 1;
                        log_unresolved(BatchKind::Create, id);
                    }
                }
            }
            push_job(&mut jobs, BatchKind::Create, chunk_index, batch);
        }

        for (chunk_index, ids) in partition.to_update.chunks(self.max_batch_size).enumerate() {
            let mut batch = WriteBatch::with_capacity(ids.len());
            for &id in ids {
                match snapshot.get(id) {
                    Some(entity) => batch.push(WriteOp::Update {
                        id,
                        fields: update_payload(entity),
                    }),
                    None => {
                        unresolved += 1;
                        log_unresolved(BatchKind::Update, id);
                    }
                }
            }
            push_job(&mut jobs, BatchKind::Update, chunk_index, batch);
        }

        for (chunk_index, ids) in partition.to_remove.chunks(self.max_batch_size).enumerate() {
            let mut batch = WriteBatch::with_capacity(ids.len());
            for &id in ids {
                batch.push(WriteOp::Delete { id });
            }
            push_job(&mut jobs, BatchKind::Delete, chunk_index, batch);
        }

        (jobs, unresolved)
    }

    fn run_chunk<S>(&self, store: &S, job: &ChunkJob) -> ChunkOutcome
    where
        S: DocumentStore + ?Sized,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match store.commit_batch(&job.batch) {
                Ok(()) => {
                    return ChunkOutcome {
                        kind: job.kind,
                        chunk_index: job.chunk_index,
                        operations: job.batch.len(),
                        attempts,
                        status: ChunkStatus::Committed,
                    };
                }
                Err(err) => err,
            };

            if attempts >= max_attempts {
                tracing::error!(
                    target: "flightsync::commit",
                    kind = job.kind.label(),
                    chunk.index = job.chunk_index,
                    chunk.operations = job.batch.len(),
                    chunk.attempts = attempts,
                    error = %err,
                    "chunk failed permanently"
                );
                return ChunkOutcome {
                    kind: job.kind,
                    chunk_index: job.chunk_index,
                    operations: job.batch.len(),
                    attempts,
                    status: ChunkStatus::Failed {
                        reason: err.to_string(),
                    },
                };
            }

            let delay = self.retry.delay_for(attempts);
            tracing::warn!(
                target: "flightsync::commit",
                kind = job.kind.label(),
                chunk.index = job.chunk_index,
                chunk.attempt = attempts,
                retry.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "chunk commit failed, retrying"
            );
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
}

fn push_job(jobs: &mut Vec<ChunkJob>, kind: BatchKind, chunk_index: usize, batch: WriteBatch) {
    if batch.is_empty() {
        return;
    }
    jobs.push(ChunkJob {
        kind,
        chunk_index,
        batch,
    });
}

fn log_unresolved(kind: BatchKind, id: EntityId) {
    tracing::warn!(
        target: "flightsync::commit",
        kind = kind.label(),
        entity.id = %id,
        "id missing from snapshot, skipped"
    );
}
