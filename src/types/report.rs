//! Commit and cycle reports.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Create,
    Update,
    Delete,
}

impl BatchKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    Committed,
    /// Retries exhausted; `reason` is the last error.
    Failed { reason: String },
}

/// Result of one chunk after all of its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub kind: BatchKind,
    /// Position of the chunk within its partition.
    pub chunk_index: usize,
    pub operations: usize,
    pub attempts: u32,
    pub status: ChunkStatus,
}

impl ChunkOutcome {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self.status, ChunkStatus::Committed)
    }
}

/// Aggregate of every chunk in one commit phase, ordered creates, updates,
/// deletes, then by chunk index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub chunks: Vec<ChunkOutcome>,
    /// Ids dropped while building batches because the snapshot had no entry.
    #[serde(default)]
    pub unresolved_ids: usize,
}

impl CommitReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.chunks.iter().all(ChunkOutcome::is_committed)
    }

    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkOutcome> {
        self.chunks.iter().filter(|chunk| !chunk.is_committed())
    }

    #[must_use]
    pub fn committed_operations(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.is_committed())
            .map(|chunk| chunk.operations)
            .sum()
    }

    #[must_use]
    pub fn chunks_of(&self, kind: BatchKind) -> usize {
        self.chunks.iter().filter(|chunk| chunk.kind == kind).count()
    }
}

/// Observable summary of one producer cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub fetched_records: usize,
    pub malformed_records: usize,
    pub duplicate_records: usize,
    pub known_ids: usize,
    pub to_add: usize,
    pub to_update: usize,
    pub to_remove: usize,
    pub suppressed_adds: usize,
    pub commit: CommitReport,
}
