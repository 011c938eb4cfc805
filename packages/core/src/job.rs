//! Job domain types for server-tracked background work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a job. Assigned by the server and opaque to the
/// client; stable for the job's whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the restaurant a job operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of background work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ReviewCrawl,
    ReviewSummary,
    RestaurantCrawl,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::ReviewCrawl => write!(f, "review_crawl"),
            JobKind::ReviewSummary => write!(f, "review_summary"),
            JobKind::RestaurantCrawl => write!(f, "restaurant_crawl"),
        }
    }
}

/// Lifecycle status of a job.
///
/// Transitions only flow `Active -> {Completed, Failed, Cancelled}` and
/// terminal states are sticky: no event revives a terminal job, only a fresh
/// job with a new [`JobId`] can.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Check if the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress counters reported by the job's upstream progress reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Units finished so far.
    pub current: u64,
    /// Total units expected.
    pub total: u64,
    /// 0..=100.
    pub percentage: u8,
}

impl Progress {
    pub fn new(current: u64, total: u64, percentage: u8) -> Self {
        Self {
            current,
            total,
            percentage: percentage.min(100),
        }
    }
}

/// A job is one long-running unit of work tracked by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub job_id: JobId,
    /// Restaurant the job operates on.
    pub entity_id: EntityId,
    /// Type of work being performed.
    pub kind: JobKind,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Set when the server reports the job was abandoned mid-flight
    /// (e.g. a process restart). Orthogonal to `status`: an interrupted
    /// job is still logically active.
    #[serde(default)]
    pub interrupted: bool,
    /// Latest accepted progress counters.
    #[serde(default)]
    pub progress: Progress,
    /// Open phase-marker map (`step`, `substep`, ...). Merged key-by-key
    /// as progress events arrive, never replaced wholesale.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Present only when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job started executing, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new active job.
    pub fn new(job_id: JobId, entity_id: EntityId, kind: JobKind) -> Self {
        Self {
            job_id,
            entity_id,
            kind,
            status: JobStatus::Active,
            interrupted: false,
            progress: Progress::default(),
            metadata: Map::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the initial progress counters.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Set the phase-marker metadata.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check if the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
