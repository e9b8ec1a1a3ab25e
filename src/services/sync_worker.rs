//! Per-case outbox drain.
//!
//! A drain locks the case's pending edits, fetches the tracker snapshot once,
//! plans and applies each edit in FIFO order and deletes the processed edits
//! only when every write succeeded. Any failure aborts the whole batch.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::EditType;
use crate::services::handlers::HandlerRegistry;
use crate::services::outbox::{LockedBatch, OutboxStore};
use crate::services::tracker::{CaseTracker, TrackerError};

/// Why a drain rolled back.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("case {0} does not exist in the tracker")]
    CaseMissing(i64),

    #[error("tracker rejected {edit_type} edit {edit_id} for case {case_id}")]
    Rejected {
        case_id: i64,
        edit_id: Uuid,
        edit_type: EditType,
    },

    #[error("no handler registered for {0} edits")]
    NoHandler(EditType),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Store(#[from] AppError),
}

/// Result of a drain that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every locked edit was processed and deleted.
    Drained { applied: usize, skipped: usize },
    /// Nothing was pending.
    Empty,
    /// Another drain holds the case.
    Contended,
}

async fn abort_with<B: LockedBatch>(batch: B, err: DrainError) -> DrainError {
    let case_id = batch.case_id();
    if let Err(e) = batch.abort().await {
        warn!(case_id, "Failed to release outbox lock: {}", e);
    }
    err
}

/// Drain the pending edits of one case.
pub async fn drain<S: OutboxStore>(
    store: &S,
    tracker: &dyn CaseTracker,
    handlers: &HandlerRegistry,
    case_id: i64,
) -> Result<DrainOutcome, DrainError> {
    let Some(batch) = store.try_lock(case_id).await? else {
        debug!(case_id, "Outbox locked by another drain, skipping");
        return Ok(DrainOutcome::Contended);
    };

    let edits = batch.edits().to_vec();
    if edits.is_empty() {
        batch.abort().await?;
        return Ok(DrainOutcome::Empty);
    }

    let mut snapshot = match tracker.fetch_case(case_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(abort_with(batch, DrainError::CaseMissing(case_id)).await),
        Err(e) => return Err(abort_with(batch, e.into()).await),
    };

    let mut processed = Vec::with_capacity(edits.len());
    let mut applied = 0;
    let mut skipped = 0;

    for edit in &edits {
        let edit_type = edit.edit_type();
        let Some(handler) = handlers.get(edit_type) else {
            return Err(abort_with(batch, DrainError::NoHandler(edit_type)).await);
        };

        let plan = handler
            .plan(case_id, &snapshot, &edit.intent)
            .filter(|updates| !updates.is_empty());
        match plan {
            None => {
                debug!(case_id, edit_id = %edit.id, edit_type = %edit_type, "Edit already reflected");
                skipped += 1;
            }
            Some(updates) => match tracker.edit(case_id, &updates).await {
                Ok(response) => match response.case {
                    Some(record) => {
                        snapshot = record;
                        applied += 1;
                    }
                    None => {
                        let err = DrainError::Rejected {
                            case_id,
                            edit_id: edit.id,
                            edit_type,
                        };
                        return Err(abort_with(batch, err).await);
                    }
                },
                Err(e) => return Err(abort_with(batch, e.into()).await),
            },
        }
        processed.push(edit.id);
    }

    batch.complete(&processed, Some(&snapshot)).await?;

    info!(case_id, applied, skipped, "Outbox drained");
    Ok(DrainOutcome::Drained { applied, skipped })
}
