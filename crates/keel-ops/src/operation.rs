use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use keel_types::OperationId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Upload,
    Download,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Download => f.write_str("download"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Starting,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Options for [`OperationTracker::start`](crate::OperationTracker::start).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Keep running through emergency suspensions.
    pub critical: bool,
    /// Memoise the result under this key; a later start with the same key
    /// completes immediately from the cache.
    pub cache_key: Option<String>,
}

impl StartOptions {
    pub fn critical() -> Self {
        Self {
            critical: true,
            cache_key: None,
        }
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// Read-only snapshot of a tracked operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub subject: String,
    /// Percent complete, within [0, 100].
    pub progress: f64,
    pub status: OperationStatus,
    pub cancel_requested: bool,
    pub critical: bool,
    pub cache_key: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    /// When the retention sweep may drop this operation.
    pub purge_at: Option<u64>,
}

impl Operation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Delivered to an operation's subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationEvent {
    Progress { id: OperationId, progress: f64 },
    Completed { id: OperationId, result: Value },
    Failed { id: OperationId, error: String },
    Cancelled { id: OperationId },
}

impl OperationEvent {
    pub fn id(&self) -> OperationId {
        match self {
            Self::Progress { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Cancelled { id } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Subscriber callback. Invoked without any tracker lock held.
pub type OperationCallback = Arc<dyn Fn(&OperationEvent) + Send + Sync>;
