//! Scripted in-memory tracker.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pdt_lib::services::tracker::{
    CaseRecord, CaseTracker, EditResponse, FieldUpdates, TrackerError,
};
use serde_json::Value;

#[derive(Default)]
struct StubState {
    cases: HashMap<i64, CaseRecord>,
    searches: usize,
    edits: Vec<(i64, FieldUpdates)>,
    /// 1-based edit call that fails with a transport error.
    fail_at: Option<usize>,
    /// 1-based edit call the tracker refuses (null case).
    reject_at: Option<usize>,
}

/// Tracker stub applying edits to stored records.
#[derive(Default)]
pub struct StubTracker {
    state: Mutex<StubState>,
}

impl StubTracker {
    pub fn with_case(id: i64, tags: &[&str]) -> Self {
        let stub = Self::default();
        stub.insert(id, tags);
        stub
    }

    pub fn insert(&self, id: i64, tags: &[&str]) {
        self.state.lock().unwrap().cases.insert(
            id,
            CaseRecord {
                id,
                title: format!("Case {}", id),
                milestone: Some("2026.10".to_string()),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
        );
    }

    pub fn fail_edit_at(&self, call: usize) {
        self.state.lock().unwrap().fail_at = Some(call);
    }

    pub fn reject_edit_at(&self, call: usize) {
        self.state.lock().unwrap().reject_at = Some(call);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_at = None;
        state.reject_at = None;
    }

    pub fn tags(&self, id: i64) -> Vec<String> {
        self.state.lock().unwrap().cases[&id].tags.clone()
    }

    pub fn field(&self, id: i64, name: &str) -> Option<String> {
        self.state.lock().unwrap().cases[&id]
            .custom_field(name)
            .map(str::to_string)
    }

    pub fn searches(&self) -> usize {
        self.state.lock().unwrap().searches
    }

    /// Edit calls attempted, including failed ones.
    pub fn edit_calls(&self) -> usize {
        self.state.lock().unwrap().edits.len()
    }

    pub fn events(&self, id: i64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .edits
            .iter()
            .filter(|(case_id, _)| *case_id == id)
            .filter_map(|(_, updates)| updates.event.clone())
            .collect()
    }
}

#[async_trait]
impl CaseTracker for StubTracker {
    async fn search(&self, query: &str, _columns: &[String]) -> Result<Vec<CaseRecord>, TrackerError> {
        let mut state = self.state.lock().unwrap();
        state.searches += 1;
        let wanted: Option<i64> = query.strip_prefix("ixBug:").and_then(|id| id.parse().ok());
        Ok(state
            .cases
            .values()
            .filter(|c| wanted.is_none_or(|id| c.id == id))
            .cloned()
            .collect())
    }

    async fn edit(&self, case_id: i64, updates: &FieldUpdates) -> Result<EditResponse, TrackerError> {
        let mut state = self.state.lock().unwrap();
        state.edits.push((case_id, updates.clone()));
        let call = state.edits.len();

        if state.fail_at == Some(call) {
            return Err(TrackerError::Transport("connection reset by peer".to_string()));
        }
        if state.reject_at == Some(call) {
            return Ok(EditResponse { case: None });
        }

        let Some(record) = state.cases.get_mut(&case_id) else {
            return Ok(EditResponse { case: None });
        };
        if let Some(tags) = &updates.tags {
            record.tags = tags.clone();
        }
        for (field, value) in &updates.custom {
            record.extra.insert(field.clone(), Value::from(value.as_str()));
        }
        Ok(EditResponse {
            case: Some(record.clone()),
        })
    }
}
