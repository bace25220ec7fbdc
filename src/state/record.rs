use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::WatchConfig;

/// The workflow states a monitored database can be in.
///
/// An unknown state in a stored record is rejected at deserialization time;
/// it means the record was written by something we don't understand and
/// continuing would risk acting on the wrong infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Wait,
    Restore,
    Modify,
    Verify,
    Cleanup,
    Alarm,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 6] = [
        WorkflowState::Wait,
        WorkflowState::Restore,
        WorkflowState::Modify,
        WorkflowState::Verify,
        WorkflowState::Cleanup,
        WorkflowState::Alarm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Wait => "wait",
            WorkflowState::Restore => "restore",
            WorkflowState::Modify => "modify",
            WorkflowState::Verify => "verify",
            WorkflowState::Cleanup => "cleanup",
            WorkflowState::Alarm => "alarm",
        }
    }

    /// States with a restore in flight; `snapshot_verifying` must be set.
    pub fn has_snapshot_in_flight(&self) -> bool {
        matches!(
            self,
            WorkflowState::Restore
                | WorkflowState::Modify
                | WorkflowState::Verify
                | WorkflowState::Cleanup
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered list of identifiers that accepts two wire encodings: a JSON
/// array of strings, or a single comma-delimited string. Parsing happens once
/// here so handlers only ever see a normalized list. Serialization always
/// emits the list form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IdList(Vec<String>);

impl IdList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for IdList {
    fn from(ids: Vec<String>) -> Self {
        IdList(ids)
    }
}

impl FromIterator<String> for IdList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        IdList(iter.into_iter().collect())
    }
}

impl fmt::Display for IdList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

impl<'de> Deserialize<'de> for IdList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Encoded {
            List(Vec<String>),
            Delimited(String),
        }

        let ids = match Encoded::deserialize(deserializer)? {
            Encoded::List(ids) => ids,
            Encoded::Delimited(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(String::from)
                .collect(),
        };
        Ok(IdList(ids))
    }
}

/// Persisted progress document for one monitored database.
///
/// Created on the first event that references the database, then mutated
/// exclusively by workflow handlers under dispatcher control. Cleanup resets
/// transient fields but never deletes the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub database: String,
    pub temporary_database: String,
    pub region: String,
    pub subnet_ids: IdList,
    pub security_group_ids: IdList,
    pub current_state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_verified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_verifying: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
    /// Opaque verification-check configuration, interpreted only by the
    /// wired-in `VerificationSuite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_checks: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Fresh record for a watch that has never been seen before.
    pub fn for_watch(watch: &WatchConfig) -> Self {
        let now = Utc::now();
        Self {
            database: watch.database.clone(),
            temporary_database: watch.temporary_database_name(),
            region: watch.region.clone(),
            subnet_ids: watch.subnet_ids.clone(),
            security_group_ids: watch.security_group_ids.clone(),
            current_state: WorkflowState::Wait,
            snapshot_verified: None,
            snapshot_verifying: None,
            temporary_password: None,
            verification_checks: watch.verification_checks.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the record to a new state. Handlers are the only callers.
    pub fn transition(&mut self, to: WorkflowState) {
        tracing::info!(
            database = %self.database,
            from = %self.current_state,
            to = %to,
            "state transition"
        );
        self.current_state = to;
        self.updated_at = Utc::now();
    }

    /// Finish a verification cycle: the in-flight snapshot becomes the
    /// verified one and the scratch credentials are erased.
    pub fn complete_cycle(&mut self) {
        self.snapshot_verified = self.snapshot_verifying.take();
        self.temporary_password = None;
        self.updated_at = Utc::now();
    }
}
