//! Engine message types
//!
//! All requests carrying a response include an `mpsc::Sender` for replies.
//! Scheduling signals (`Advance`, `Complete`, `Fail`) are fire-and-forget:
//! they are how a processor (or the engine itself) drives a job forward one
//! step at a time.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::reader::XmlReadError;

/// Identifies one shredding job for the lifetime of an engine instance.
/// Supplied by the caller; must not collide with a live job.
pub type JobId = u64;

// ============================================================================
// Engine Messages
// ============================================================================

/// A message sent to the [`ShredderActor`](crate::actor::ShredderActor).
#[derive(Debug)]
pub enum ShredderMessage {
  /// Ask the engine to start shredding a document
  Submit {
    request: SubmitRequest,
    /// Submission outcome, reported synchronously to the caller
    reply: mpsc::Sender<Result<(), SubmitError>>,
  },
  /// Pull and dispatch exactly one structural event for the job.
  /// Self-addressed: only the engine (first event) and the job's own
  /// processor context ever send it.
  Advance { job_id: JobId },
  /// Processor reports terminal success
  Complete { job_id: JobId },
  /// Processor or engine reports a non-recoverable job error
  Fail { job_id: JobId, message: String },
  /// Stop the engine
  Shutdown,
}

/// Everything needed to start one job.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
  /// Declared document type, matched against provider claims
  pub doc_type: String,
  /// Path to the document to shred
  pub path: PathBuf,
  /// Caller-chosen id, unique among live jobs
  pub job_id: JobId,
}

/// Submission rejected; no job state was created.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
  #[error("no provider registered for document type '{doc_type}'")]
  NoProviderFound { doc_type: String },
  #[error("unable to open source '{path}': {source}")]
  SourceUnreadable {
    path: PathBuf,
    #[source]
    source: XmlReadError,
  },
  #[error("job {0} is already active")]
  DuplicateJob(JobId),
  #[error("shredder engine has shut down")]
  EngineUnavailable,
}

// ============================================================================
// Job Events
// ============================================================================

/// Terminal job notification, delivered on the engine's optional event
/// channel. Submission failures never produce one; they are reported
/// synchronously instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
  /// The processor reported completion and the job was cleaned up
  Completed { job_id: JobId },
  /// The job failed mid-flight and was cleaned up
  Failed { job_id: JobId, message: String },
}

impl JobEvent {
  /// The job this event is about.
  pub fn job_id(&self) -> JobId {
    match self {
      Self::Completed { job_id } => *job_id,
      Self::Failed { job_id, .. } => *job_id,
    }
  }

  /// Returns true for [`JobEvent::Failed`].
  pub fn is_failure(&self) -> bool {
    matches!(self, Self::Failed { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn job_event_accessors() {
    let completed = JobEvent::Completed { job_id: 7 };
    assert_eq!(completed.job_id(), 7);
    assert!(!completed.is_failure());

    let failed = JobEvent::Failed {
      job_id: 8,
      message: "stream read failed".to_string(),
    };
    assert_eq!(failed.job_id(), 8);
    assert!(failed.is_failure());
  }
}
