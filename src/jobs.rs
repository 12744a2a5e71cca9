//! Processing job state machine.
//!
//! ```text
//! pending ──start──▶ processing ──complete──▶ completed
//!    │                   │
//!    │                   ├──fail──▶ failed
//!    └──cancel──┬────────┘
//!               ▼
//!           cancelled
//! ```
//!
//! Terminal states never change again. `fail` is also accepted from
//! `pending` so that resolution errors before work starts are recorded.

use chrono::Utc;
use thiserror::Error;

use crate::models::{JobStatus, ProcessingJob};

/// An illegal transition was requested.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} a job in state '{from}'")]
pub struct TransitionError {
    pub from: JobStatus,
    pub action: &'static str,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job moved to `cancelled`.
    Cancelled,
    /// The job was already cancelled; nothing changed.
    AlreadyCancelled,
    /// The job had already completed or failed; nothing changed.
    Rejected(JobStatus),
}

impl ProcessingJob {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            status: JobStatus::Pending,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(TransitionError {
                from: self.status,
                action: "start",
            });
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(TransitionError {
                from: self.status,
                action: "complete",
            });
        }
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                action: "fail",
            });
        }
        self.status = JobStatus::Failed;
        self.error = Some(message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self) -> CancelOutcome {
        match self.status {
            JobStatus::Pending | JobStatus::Processing => {
                self.status = JobStatus::Cancelled;
                self.completed_at = Some(Utc::now());
                CancelOutcome::Cancelled
            }
            JobStatus::Cancelled => CancelOutcome::AlreadyCancelled,
            other => CancelOutcome::Rejected(other),
        }
    }
}
