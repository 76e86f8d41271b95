use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::runner::BackfillSummary;
use crate::services::types::{Network, TokenAddress};

/// Priority used when the caller does not ask for one
pub const DEFAULT_PRIORITY: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { processed: usize, failed: usize },
    Failed { reason: String },
}

/// Tracked state of one backfill request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillJob {
    pub id: Uuid,
    pub token: TokenAddress,
    pub network: Network,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub progress_percent: u8,
    pub status: JobStatus,
}

impl BackfillJob {
    pub fn new(token: TokenAddress, network: Network, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            network,
            priority,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            attempts: 0,
            progress_percent: 0,
            status: JobStatus::Queued,
        }
    }

    /// Record a progress report, ignoring anything below what was already seen.
    /// Returns true when the stored value changed.
    pub fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.progress_percent {
            self.progress_percent = percent;
            true
        } else {
            false
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at.get_or_insert_with(Utc::now);
    }

    pub fn mark_completed(&mut self, summary: &BackfillSummary) {
        self.progress_percent = 100;
        self.status = JobStatus::Completed {
            processed: summary.processed,
            failed: summary.failed.len(),
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: String) {
        self.status = JobStatus::Failed { reason };
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed { .. } | JobStatus::Failed { .. }
        )
    }
}

/// Acknowledgement returned to whoever scheduled the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
}

/// Lifecycle notifications published by the queue
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress { id: Uuid, percent: u8 },
    Completed { id: Uuid, summary: BackfillSummary },
    Failed { id: Uuid, reason: String },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Progress { id, .. }
            | JobEvent::Completed { id, .. }
            | JobEvent::Failed { id, .. } => *id,
        }
    }
}
