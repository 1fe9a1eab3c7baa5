//! Values exchanged with callers and transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stagehand_core::DocumentId;

use crate::error::SaveError;

/// Externally visible save status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveStatus {
    Idle,
    Pending,
    Saving,
    Saved,
    Error,
    ItemSaved,
    ItemError,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Pending => "pending",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
            SaveStatus::Error => "error",
            SaveStatus::ItemSaved => "item-saved",
            SaveStatus::ItemError => "item-error",
        }
    }
}

impl core::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable copy of the editor state, produced fresh for every attempt.
///
/// Backed by a `serde_json::Value`, so it cannot hold back-references or
/// live UI handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSnapshot(Value);

impl DocumentSnapshot {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Check the snapshot is an object carrying every required field.
    ///
    /// Null, empty strings and whitespace-only strings count as missing.
    pub fn validate(&self, required_fields: &[String]) -> Result<(), SaveError> {
        let object = self.0.as_object().ok_or(SaveError::NotAnObject)?;
        for name in required_fields {
            let present = match object.get(name) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(SaveError::MissingField(name.clone()));
            }
        }
        Ok(())
    }
}

impl From<Value> for DocumentSnapshot {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Which persistence call a save attempt makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "document_id")]
pub enum PersistOp {
    /// No durable identifier is known yet.
    Create,
    /// Overwrite the document the service already knows.
    Update(DocumentId),
}

impl PersistOp {
    pub fn name(&self) -> &'static str {
        match self {
            PersistOp::Create => "create",
            PersistOp::Update(_) => "update",
        }
    }
}

/// What a successful persistence call returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    /// Set by create; update leaves it empty.
    pub assigned_id: Option<DocumentId>,
}

impl PersistOutcome {
    pub fn created(id: DocumentId) -> Self {
        Self {
            assigned_id: Some(id),
        }
    }

    pub fn updated() -> Self {
        Self::default()
    }
}

/// Outcome of a fine-grained write reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSaveOutcome {
    Saved,
    Failed,
}

/// A sub-resource write (e.g. a single grid cell) that bypassed the debounce pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSaveReport {
    pub op: String,
    pub outcome: ItemSaveOutcome,
    pub details: Option<String>,
    pub reported_at: DateTime<Utc>,
}

impl ItemSaveReport {
    pub fn status(&self) -> SaveStatus {
        match self.outcome {
            ItemSaveOutcome::Saved => SaveStatus::ItemSaved,
            ItemSaveOutcome::Failed => SaveStatus::ItemError,
        }
    }
}

/// Read-only copy of the orchestrator state; also the status event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    /// What a UI should display: the item overlay if one is active, else `document_status`.
    pub status: SaveStatus,
    pub document_status: SaveStatus,
    pub dirty: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub is_saving: bool,
    pub is_online: bool,
    /// Waiting for reconnect after an offline attempt. A new edit clears it,
    /// since its debounce timer owns the next attempt.
    pub parked: bool,
    pub document_id: Option<DocumentId>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub item: Option<ItemSaveReport>,
}
