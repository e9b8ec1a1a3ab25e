//! Issue tracker client.
//!
//! The tracker is reached through the [`CaseTracker`] trait so the sync worker
//! and import task can run against a stub in tests. [`FogBugzClient`] talks to
//! the FogBugz JSON API (`cmd=search`, `cmd=edit`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::TrackerSettings;

/// HTTP connect timeout for tracker API calls.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// HTTP total timeout for tracker API calls.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Columns requested for every case.
pub const CASE_COLUMNS: &[&str] = &[
    "ixBug",
    "sTitle",
    "sLatestTextSummary",
    "sProject",
    "sArea",
    "sFixFor",
    "dtFixFor",
    "dtLastUpdated",
    "tags",
];

/// Tracker request failures.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("tracker rejected the request: {0}")]
    Api(String),

    #[error("unexpected tracker response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TrackerError::Decode(err.to_string())
        } else {
            TrackerError::Transport(err.to_string())
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A case as returned by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(rename = "ixBug")]
    pub id: i64,
    #[serde(rename = "sTitle", default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(rename = "sLatestTextSummary", default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(rename = "sProject", default)]
    pub project: Option<String>,
    #[serde(rename = "sArea", default)]
    pub area: Option<String>,
    /// Milestone name; maps to a local release.
    #[serde(rename = "sFixFor", default)]
    pub milestone: Option<String>,
    #[serde(rename = "dtFixFor", default)]
    pub milestone_date: Option<DateTime<Utc>>,
    #[serde(rename = "dtLastUpdated", default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Custom fields and any other columns.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CaseRecord {
    /// Value of a string custom field, if set and non-empty.
    pub fn custom_field(&self, name: &str) -> Option<&str> {
        self.extra
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Field changes for a single edit call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdates {
    /// Full replacement tag set.
    pub tags: Option<Vec<String>>,
    /// Comment added to the case history.
    pub event: Option<String>,
    /// Custom field values by column name.
    pub custom: BTreeMap<String, String>,
}

impl FieldUpdates {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.event.is_none() && self.custom.is_empty()
    }
}

/// Result of an edit call. `case` is `None` when the tracker refused the edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditResponse {
    pub case: Option<CaseRecord>,
}

/// External issue tracker.
#[async_trait]
pub trait CaseTracker: Send + Sync {
    /// Search cases with the tracker's query syntax.
    async fn search(&self, query: &str, columns: &[String]) -> Result<Vec<CaseRecord>, TrackerError>;

    /// Apply field changes to a case.
    async fn edit(&self, case_id: i64, updates: &FieldUpdates) -> Result<EditResponse, TrackerError>;

    /// Columns to request so records carry every field the handlers read.
    fn columns(&self) -> Vec<String> {
        CASE_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    /// Fetch a single case by id.
    async fn fetch_case(&self, case_id: i64) -> Result<Option<CaseRecord>, TrackerError> {
        let cases = self
            .search(&format!("ixBug:{}", case_id), &self.columns())
            .await?;
        Ok(cases.into_iter().find(|c| c.id == case_id))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorItem {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    cases: Vec<CaseRecord>,
}

#[derive(Debug, Deserialize)]
struct EditData {
    #[serde(default)]
    case: Option<CaseRecord>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, TrackerError> {
        if !self.errors.is_empty() {
            let messages: Vec<String> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(TrackerError::Api(messages.join("; ")));
        }
        Ok(self.data)
    }
}

/// FogBugz JSON API client.
pub struct FogBugzClient {
    http: reqwest::Client,
    endpoint: String,
    token: SecretString,
    custom_columns: Vec<String>,
}

impl FogBugzClient {
    pub fn new(settings: &TrackerSettings) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/f/api/0/jsonapi", settings.url),
            token: settings.token.clone(),
            custom_columns: vec![
                settings.ci_project_field.clone(),
                settings.migration_url_field.clone(),
                settings.revision_field.clone(),
            ],
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        mut body: Map<String, Value>,
    ) -> Result<Option<T>, TrackerError> {
        body.insert(
            "token".to_string(),
            Value::String(self.token.expose_secret().to_string()),
        );

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let envelope: Envelope<T> = response.json().await?;
        envelope.into_data()
    }
}

#[async_trait]
impl CaseTracker for FogBugzClient {
    async fn search(&self, query: &str, columns: &[String]) -> Result<Vec<CaseRecord>, TrackerError> {
        debug!(query = %query, "Searching tracker cases");

        let mut body = Map::new();
        body.insert("cmd".to_string(), Value::from("search"));
        body.insert("q".to_string(), Value::from(query));
        body.insert("cols".to_string(), Value::from(columns.to_vec()));

        let data: Option<SearchData> = self.call(body).await?;
        Ok(data.map(|d| d.cases).unwrap_or_default())
    }

    async fn edit(&self, case_id: i64, updates: &FieldUpdates) -> Result<EditResponse, TrackerError> {
        debug!(case_id, "Editing tracker case");

        let mut body = Map::new();
        body.insert("cmd".to_string(), Value::from("edit"));
        body.insert("ixBug".to_string(), Value::from(case_id));
        body.insert("cols".to_string(), Value::from(self.columns()));
        if let Some(tags) = &updates.tags {
            body.insert("sTags".to_string(), Value::from(tags.join(",")));
        }
        if let Some(event) = &updates.event {
            body.insert("sEvent".to_string(), Value::from(event.as_str()));
        }
        for (field, value) in &updates.custom {
            body.insert(field.clone(), Value::from(value.as_str()));
        }

        let data: Option<EditData> = self.call(body).await?;
        Ok(EditResponse {
            case: data.and_then(|d| d.case),
        })
    }

    fn columns(&self) -> Vec<String> {
        CASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.custom_columns.iter().cloned())
            .collect()
    }
}
