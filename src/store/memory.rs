//! In-process document store with atomic batches, live subscriptions, and
//! optional JSON persistence.
//!
//! Batches are validated against a staged view first; nothing touches the
//! committed map (or the file on disk) unless every op in the batch succeeds.
//! Subscribers receive one burst per committed batch, in commit order.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use atomic_write_file::AtomicWriteFile;
use crossbeam_channel::{Sender, unbounded};
use uuid::Uuid;

use super::{ChangeSource, DocumentStore, Subscription, WriteBatch, WriteOp};
use crate::constants::MAX_BATCH_SIZE;
use crate::types::{ChangeKind, ChangeNotification, EntityDocument, EntityId, StreamEvent};
use crate::{FlightsyncError, Result};

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<EntityId, EntityDocument>,
    subscribers: Vec<(Uuid, Sender<StreamEvent>)>,
}

impl StoreState {
    fn broadcast(&mut self, burst: &[ChangeNotification]) {
        if burst.is_empty() {
            return;
        }
        self.subscribers.retain(|(id, sender)| {
            let delivered = sender.send(StreamEvent::Burst(burst.to_vec())).is_ok();
            if !delivered {
                tracing::debug!(target: "flightsync::store", subscription = %id, "pruned closed subscription");
            }
            delivered
        });
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
    credentials_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty, memory-only store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON snapshot at `path`, loaded now if it exists and
    /// rewritten atomically after every committed batch.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut documents = BTreeMap::new();
        if path.exists() {
            let bytes = fs_err::read(&path)?;
            let stored: Vec<EntityDocument> = serde_json::from_slice(&bytes)?;
            for document in stored {
                documents.insert(document.id, document);
            }
        }
        tracing::info!(
            target: "flightsync::store",
            path = %path.display(),
            store.documents = documents.len(),
            "opened persistent store"
        );
        Ok(Self {
            state: Mutex::new(StoreState {
                documents,
                subscribers: Vec::new(),
            }),
            path: Some(path),
            credentials_path: None,
        })
    }

    /// Require a readable credentials file for `authenticate`.
    #[must_use]
    pub fn with_credentials(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| FlightsyncError::BatchCommit {
            reason: "store state lock poisoned".into(),
        })
    }

    #[must_use]
    pub fn document(&self, id: EntityId) -> Option<EntityDocument> {
        self.lock().ok()?.documents.get(&id).cloned()
    }

    #[must_use]
    pub fn documents(&self) -> Vec<EntityDocument> {
        self.lock()
            .map(|state| state.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.documents.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().map(|state| state.subscribers.len()).unwrap_or(0)
    }

    /// Break every live subscription with a `StreamEvent::Error`, as a dropped
    /// store connection would.
    pub fn disconnect_subscribers(&self, reason: &str) {
        if let Ok(mut state) = self.lock() {
            for (id, sender) in state.subscribers.drain(..) {
                tracing::warn!(target: "flightsync::store", subscription = %id, reason, "dropping subscription");
                let _ = sender.send(StreamEvent::Error(reason.to_string()));
            }
        }
    }

    fn persist(&self, documents: &BTreeMap<EntityId, EntityDocument>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: Vec<&EntityDocument> = documents.values().collect();
        let bytes = serde_json::to_vec(&snapshot)?;
        let mut file = AtomicWriteFile::options().open(path)?;
        file.write_all(&bytes)?;
        file.commit()?;
        Ok(())
    }
}

fn stage(
    documents: &BTreeMap<EntityId, EntityDocument>,
    batch: &WriteBatch,
) -> Result<(HashMap<EntityId, Option<EntityDocument>>, Vec<ChangeNotification>)> {
    let mut staged: HashMap<EntityId, Option<EntityDocument>> = HashMap::new();
    let mut notifications = Vec::with_capacity(batch.len());

    for op in batch.ops() {
        let id = op.id();
        let current = match staged.get(&id) {
            Some(entry) => entry.clone(),
            None => documents.get(&id).cloned(),
        };
        match (op, current) {
            (WriteOp::Create { .. }, Some(_)) => {
                return Err(FlightsyncError::DocumentRejected {
                    id,
                    reason: "create on existing document".into(),
                });
            }
            (WriteOp::Create { document }, None) => {
                staged.insert(id, Some(document.clone()));
                notifications.push(ChangeNotification::new(ChangeKind::Added, document.clone()));
            }
            (WriteOp::Update { .. }, None) => {
                return Err(FlightsyncError::DocumentRejected {
                    id,
                    reason: "update on missing document".into(),
                });
            }
            (WriteOp::Update { fields, .. }, Some(mut document)) => {
                document.merge_fields(fields)?;
                if document.id != id {
                    return Err(FlightsyncError::DocumentRejected {
                        id,
                        reason: "update may not change the document id".into(),
                    });
                }
                staged.insert(id, Some(document.clone()));
                notifications.push(ChangeNotification::new(ChangeKind::Modified, document));
            }
            (WriteOp::Delete { .. }, Some(document)) => {
                staged.insert(id, None);
                notifications.push(ChangeNotification::new(ChangeKind::Removed, document));
            }
            (WriteOp::Delete { .. }, None) => {}
        }
    }
    Ok((staged, notifications))
}

impl DocumentStore for MemoryStore {
    fn authenticate(&self) -> Result<()> {
        let Some(path) = &self.credentials_path else {
            return Ok(());
        };
        let metadata = fs_err::metadata(path).map_err(|err| FlightsyncError::StoreAuth {
            reason: err.to_string(),
        })?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(FlightsyncError::StoreAuth {
                reason: format!("credentials at {} are empty or not a file", path.display()),
            });
        }
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<EntityId>> {
        Ok(self.lock()?.documents.keys().copied().collect())
    }

    fn commit_batch(&self, batch: &WriteBatch) -> Result<()> {
        if batch.len() > MAX_BATCH_SIZE {
            return Err(FlightsyncError::BatchCommit {
                reason: format!(
                    "batch of {} operations exceeds the {MAX_BATCH_SIZE} operation limit",
                    batch.len()
                ),
            });
        }
        let mut state = self.lock()?;
        let (staged, notifications) = stage(&state.documents, batch)?;

        if self.path.is_some() {
            let mut next = state.documents.clone();
            apply(&mut next, staged);
            self.persist(&next)?;
            state.documents = next;
        } else {
            apply(&mut state.documents, staged);
        }
        state.broadcast(&notifications);
        Ok(())
    }
}

fn apply(
    documents: &mut BTreeMap<EntityId, EntityDocument>,
    staged: HashMap<EntityId, Option<EntityDocument>>,
) {
    for (id, entry) in staged {
        match entry {
            Some(document) => {
                documents.insert(id, document);
            }
            None => {
                documents.remove(&id);
            }
        }
    }
}

impl ChangeSource for MemoryStore {
    fn subscribe(&self) -> Result<Subscription> {
        let mut state = self.lock().map_err(|err| FlightsyncError::Subscription {
            reason: err.to_string(),
        })?;
        let (sender, receiver) = unbounded();
        let initial: Vec<ChangeNotification> = state
            .documents
            .values()
            .map(|document| ChangeNotification::new(ChangeKind::Added, document.clone()))
            .collect();
        // Sent even when empty: the first burst is the subscriber's full view.
        let _ = sender.send(StreamEvent::Burst(initial));
        let id = Uuid::new_v4();
        state.subscribers.push((id, sender));
        tracing::debug!(target: "flightsync::store", subscription = %id, "subscribed");
        Ok(Subscription::new(id, receiver))
    }
}
