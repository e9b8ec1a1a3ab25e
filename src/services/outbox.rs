//! Tracker sync outbox.
//!
//! Pending tracker edits are stored per case and drained by the sync worker.
//! Enqueue is idempotent per (case, edit type, target digest): a repeated
//! enqueue refreshes the payload of the pending row and keeps its id, so its
//! FIFO position is stable. The notify sweep uses
//! [`OutboxStore::enqueue_if_absent`] instead, which never touches a pending
//! row: its view of local state may already be older than what is queued.
//!
//! [`MemoryOutbox`] mirrors the PostgreSQL store's locking rules and backs the
//! sync tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{CaseEdit, EditIntent};
use crate::services::tracker::CaseRecord;

/// Durable queue of pending tracker edits.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Batch: LockedBatch;

    /// Get-or-create the pending edit for this intent; returns its id.
    async fn enqueue(&self, case_id: i64, intent: &EditIntent) -> AppResult<Uuid>;

    /// Create the edit only when neither it nor the edit it would supersede
    /// is pending. Pending rows are left as they are; returns `None` then.
    async fn enqueue_if_absent(
        &self,
        case_id: i64,
        intent: &EditIntent,
    ) -> AppResult<Option<Uuid>>;

    /// Pending edits of a case in FIFO order.
    async fn pending_for(&self, case_id: i64) -> AppResult<Vec<CaseEdit>>;

    async fn pending_count(&self, case_id: i64) -> AppResult<u64>;

    /// Ids of every case with at least one pending edit.
    async fn cases_with_pending(&self) -> AppResult<Vec<i64>>;

    /// Lock the case's pending edits without waiting.
    ///
    /// Returns `Ok(None)` when another drain holds the lock.
    async fn try_lock(&self, case_id: i64) -> AppResult<Option<Self::Batch>>;
}

/// Edits locked for one drain. Dropping a batch without completing it aborts.
#[async_trait]
pub trait LockedBatch: Send {
    fn case_id(&self) -> i64;

    /// Locked edits in FIFO order.
    fn edits(&self) -> &[CaseEdit];

    /// Delete the processed edits, store the refreshed tags and release the lock.
    async fn complete(self, processed: &[Uuid], refreshed: Option<&CaseRecord>) -> AppResult<()>;

    /// Release the lock leaving every edit pending.
    async fn abort(self) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnqueueMode {
    /// Supersede the opposite edit and refresh a pending payload.
    Refresh,
    /// Leave pending edits untouched.
    IfAbsent,
}

#[derive(Default)]
struct MemoryState {
    edits: Vec<CaseEdit>,
    locked: HashSet<i64>,
    /// Enqueues that hit a locked case; applied once the lock is released.
    deferred: HashMap<i64, Vec<(Uuid, EditIntent, EnqueueMode)>>,
    tags: HashMap<i64, Vec<String>>,
}

impl MemoryState {
    fn pending_mut(&mut self, case_id: i64, intent: &EditIntent) -> Option<&mut CaseEdit> {
        let edit_type = intent.edit_type();
        let digest = intent.target_digest();
        self.edits.iter_mut().find(|e| {
            e.case_id == case_id
                && e.edit_type() == edit_type
                && e.intent.target_digest() == digest
        })
    }

    fn push(&mut self, case_id: i64, id: Uuid, intent: &EditIntent) -> Uuid {
        self.edits.push(CaseEdit {
            id,
            case_id,
            intent: intent.clone(),
            created_at: Utc::now(),
        });
        id
    }

    fn upsert(&mut self, case_id: i64, new_id: Uuid, intent: &EditIntent) -> Uuid {
        if let Some(superseded) = intent.edit_type().superseded() {
            self.edits
                .retain(|e| !(e.case_id == case_id && e.edit_type() == superseded));
        }

        if let Some(existing) = self.pending_mut(case_id, intent) {
            existing.intent = intent.clone();
            return existing.id;
        }
        self.push(case_id, new_id, intent)
    }

    fn insert_if_absent(
        &mut self,
        case_id: i64,
        new_id: Uuid,
        intent: &EditIntent,
    ) -> Option<Uuid> {
        let opposite_pending = intent.edit_type().superseded().is_some_and(|superseded| {
            self.edits
                .iter()
                .any(|e| e.case_id == case_id && e.edit_type() == superseded)
        });
        if opposite_pending || self.pending_mut(case_id, intent).is_some() {
            return None;
        }
        Some(self.push(case_id, new_id, intent))
    }

    /// Park an enqueue on a locked case; returns whether it was parked.
    fn defer(&mut self, case_id: i64, id: Uuid, intent: &EditIntent, mode: EnqueueMode) -> bool {
        if !self.locked.contains(&case_id) {
            return false;
        }
        self.deferred
            .entry(case_id)
            .or_default()
            .push((id, intent.clone(), mode));
        true
    }

    fn release(&mut self, case_id: i64) {
        self.locked.remove(&case_id);
        for (id, intent, mode) in self.deferred.remove(&case_id).unwrap_or_default() {
            match mode {
                EnqueueMode::Refresh => {
                    self.upsert(case_id, id, &intent);
                }
                EnqueueMode::IfAbsent => {
                    self.insert_if_absent(case_id, id, &intent);
                }
            }
        }
    }
}

/// In-process outbox store.
#[derive(Clone, Default)]
pub struct MemoryOutbox {
    state: Arc<Mutex<MemoryState>>,
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags stored by the last completed drain of a case.
    pub fn tags_for(&self, case_id: i64) -> Option<Vec<String>> {
        lock_state(&self.state).tags.get(&case_id).cloned()
    }

    pub fn is_locked(&self, case_id: i64) -> bool {
        lock_state(&self.state).locked.contains(&case_id)
    }
}

#[async_trait]
impl OutboxStore for MemoryOutbox {
    type Batch = MemoryBatch;

    async fn enqueue(&self, case_id: i64, intent: &EditIntent) -> AppResult<Uuid> {
        let mut state = lock_state(&self.state);
        let id = Uuid::now_v7();
        if state.defer(case_id, id, intent, EnqueueMode::Refresh) {
            return Ok(id);
        }
        Ok(state.upsert(case_id, id, intent))
    }

    async fn enqueue_if_absent(
        &self,
        case_id: i64,
        intent: &EditIntent,
    ) -> AppResult<Option<Uuid>> {
        let mut state = lock_state(&self.state);
        let id = Uuid::now_v7();
        if state.defer(case_id, id, intent, EnqueueMode::IfAbsent) {
            return Ok(Some(id));
        }
        Ok(state.insert_if_absent(case_id, id, intent))
    }

    async fn pending_for(&self, case_id: i64) -> AppResult<Vec<CaseEdit>> {
        let state = lock_state(&self.state);
        let mut edits: Vec<CaseEdit> = state
            .edits
            .iter()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect();
        edits.sort_by_key(|e| (e.created_at, e.id));
        Ok(edits)
    }

    async fn pending_count(&self, case_id: i64) -> AppResult<u64> {
        let state = lock_state(&self.state);
        Ok(state.edits.iter().filter(|e| e.case_id == case_id).count() as u64)
    }

    async fn cases_with_pending(&self) -> AppResult<Vec<i64>> {
        let state = lock_state(&self.state);
        let mut cases: Vec<i64> = state.edits.iter().map(|e| e.case_id).collect();
        cases.sort_unstable();
        cases.dedup();
        Ok(cases)
    }

    async fn try_lock(&self, case_id: i64) -> AppResult<Option<MemoryBatch>> {
        let edits = {
            let mut state = lock_state(&self.state);
            if !state.locked.insert(case_id) {
                return Ok(None);
            }
            let mut edits: Vec<CaseEdit> = state
                .edits
                .iter()
                .filter(|e| e.case_id == case_id)
                .cloned()
                .collect();
            edits.sort_by_key(|e| (e.created_at, e.id));
            edits
        };

        Ok(Some(MemoryBatch {
            state: self.state.clone(),
            case_id,
            edits,
            released: false,
        }))
    }
}

/// Locked edits of one case in a [`MemoryOutbox`].
pub struct MemoryBatch {
    state: Arc<Mutex<MemoryState>>,
    case_id: i64,
    edits: Vec<CaseEdit>,
    released: bool,
}

#[async_trait]
impl LockedBatch for MemoryBatch {
    fn case_id(&self) -> i64 {
        self.case_id
    }

    fn edits(&self) -> &[CaseEdit] {
        &self.edits
    }

    async fn complete(mut self, processed: &[Uuid], refreshed: Option<&CaseRecord>) -> AppResult<()> {
        let mut state = lock_state(&self.state);
        state.edits.retain(|e| !processed.contains(&e.id));
        if let Some(record) = refreshed {
            state.tags.insert(self.case_id, record.tags.clone());
        }
        state.release(self.case_id);
        drop(state);
        self.released = true;
        Ok(())
    }

    async fn abort(mut self) -> AppResult<()> {
        lock_state(&self.state).release(self.case_id);
        self.released = true;
        Ok(())
    }
}

impl Drop for MemoryBatch {
    fn drop(&mut self) {
        if !self.released {
            lock_state(&self.state).release(self.case_id);
        }
    }
}
