//! ShredderActor - the step-wise document shredding engine
//!
//! The engine owns every live job: its open streaming reader, its bound
//! processor instance and its watchdog. One `Advance` message moves one job
//! forward by exactly one structural event; the processor decides when the
//! next advance happens. Because the actor handles one message at a time,
//! events for a single job are strictly ordered with at most one in flight,
//! while many jobs interleave fairly on the same task.
//!
//! # Lifecycle
//!
//! The actor runs in a loop until one of:
//! - The CancellationToken is triggered
//! - A `ShredderMessage::Shutdown` message is received
//! - The message channel is closed

use std::{
  collections::HashMap,
  path::PathBuf,
  time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
  handle::ShredderHandle,
  message::{JobEvent, JobId, ShredderMessage, SubmitError, SubmitRequest},
};
use crate::{
  config::EngineConfig,
  processor::{EventProcessor, ProcessorContext},
  provider::ProviderRegistry,
  reader::{FileXmlReader, XmlReader},
};

// ============================================================================
// Job State
// ============================================================================

/// One live shredding job. Owned exclusively by the engine; dropped on
/// completion or error, which closes the reader.
struct Job {
  doc_type: String,
  path: PathBuf,
  reader: FileXmlReader,
  processor: Box<dyn EventProcessor>,
  /// Cancelled on cleanup; disarms the watchdog
  guard: CancellationToken,
  submitted_at: Instant,
}

/// Terminal outcome of a job, for cleanup and event reporting.
enum Outcome {
  Completed,
  Failed(String),
}

// ============================================================================
// ShredderActor
// ============================================================================

/// The shredding engine actor.
///
/// Accepts submissions, resolves a provider per document type, then drives
/// each job through the pull/dispatch/resume cycle until its processor
/// reports completion or an error funnels into cleanup.
pub struct ShredderActor {
  config: EngineConfig,
  registry: ProviderRegistry,
  jobs: HashMap<JobId, Job>,
  msg_rx: mpsc::Receiver<ShredderMessage>,
  /// The engine's own address, used for self-addressed advances and handed
  /// to every processor context
  handle: ShredderHandle,
  /// Optional terminal-outcome notifications for the hosting process
  events: Option<mpsc::Sender<JobEvent>>,
  cancel: CancellationToken,
}

impl ShredderActor {
  /// Spawn the engine and return a handle for submitting jobs.
  pub fn spawn(
    config: EngineConfig,
    registry: ProviderRegistry,
    events: Option<mpsc::Sender<JobEvent>>,
    cancel: CancellationToken,
  ) -> ShredderHandle {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
    let handle = ShredderHandle::new(tx);
    let actor = Self {
      config,
      registry,
      jobs: HashMap::new(),
      msg_rx: rx,
      handle: handle.clone(),
      events,
      cancel,
    };
    tokio::spawn(actor.run());
    handle
  }

  /// Main actor loop.
  pub async fn run(mut self) {
    info!(providers = self.registry.len(), "shredder engine started");

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              info!("shredder engine shutting down (cancelled)");
              break;
          }

          msg = self.msg_rx.recv() => {
              match msg {
                  Some(ShredderMessage::Shutdown) => {
                      info!("shredder engine shutting down (requested)");
                      break;
                  }
                  Some(msg) => self.handle_message(msg).await,
                  None => {
                      info!("shredder engine shutting down (channel closed)");
                      break;
                  }
              }
          }
      }
    }

    for (job_id, job) in self.jobs.drain() {
      job.guard.cancel();
      debug!(job_id, "discarding job at shutdown");
    }
    info!("shredder engine stopped");
  }

  async fn handle_message(&mut self, msg: ShredderMessage) {
    match msg {
      ShredderMessage::Submit { request, reply } => {
        let outcome = self.submit(request).await;
        if reply.send(outcome).await.is_err() {
          debug!("submitter stopped waiting for the outcome");
        }
      }
      ShredderMessage::Advance { job_id } => self.advance(job_id).await,
      ShredderMessage::Complete { job_id } => self.finish(job_id, Outcome::Completed).await,
      ShredderMessage::Fail { job_id, message } => self.finish(job_id, Outcome::Failed(message)).await,
      ShredderMessage::Shutdown => {} // handled in the main loop
    }
  }

  // ==========================================================================
  // Submission
  // ==========================================================================

  /// Validate a submission and, on acceptance, record the job and schedule
  /// its first advance. Every rejection leaves the engine without a trace
  /// of the request.
  async fn submit(&mut self, request: SubmitRequest) -> Result<(), SubmitError> {
    let SubmitRequest { doc_type, path, job_id } = request;

    if self.jobs.contains_key(&job_id) {
      return Err(SubmitError::DuplicateJob(job_id));
    }
    let provider = self
      .registry
      .resolve(&doc_type)
      .ok_or_else(|| SubmitError::NoProviderFound {
        doc_type: doc_type.clone(),
      })?;
    let reader = XmlReader::open(&path).await.map_err(|source| SubmitError::SourceUnreadable {
      path: path.clone(),
      source,
    })?;

    let context = ProcessorContext::new(job_id, self.handle.clone());
    let processor = provider.provide(context);

    let guard = self.cancel.child_token();
    self.arm_watchdog(job_id, guard.clone());

    info!(
        job_id,
        doc_type = %doc_type,
        path = %path.display(),
        provider = provider.name(),
        "shredding document"
    );
    self.jobs.insert(
      job_id,
      Job {
        doc_type,
        path,
        reader,
        processor,
        guard,
        submitted_at: Instant::now(),
      },
    );

    self.handle.signal(ShredderMessage::Advance { job_id });
    Ok(())
  }

  /// Fail the job if it is still live when the timeout elapses. The guard
  /// token is cancelled during cleanup, which disarms the watchdog.
  fn arm_watchdog(&self, job_id: JobId, guard: CancellationToken) {
    if self.config.job_timeout_secs == 0 {
      return;
    }
    let timeout = Duration::from_secs(self.config.job_timeout_secs);
    let handle = self.handle.clone();
    tokio::spawn(async move {
      tokio::select! {
          _ = guard.cancelled() => {}
          _ = tokio::time::sleep(timeout) => {
              warn!(job_id, timeout_secs = timeout.as_secs(), "job watchdog expired");
              handle.signal(ShredderMessage::Fail {
                job_id,
                message: "job timed out".to_string(),
              });
          }
      }
    });
  }

  // ==========================================================================
  // Stepping
  // ==========================================================================

  /// Pull one structural event and dispatch it to the job's processor.
  /// Does not schedule the next advance; the processor owns that decision.
  async fn advance(&mut self, job_id: JobId) {
    let failure = {
      let Some(job) = self.jobs.get_mut(&job_id) else {
        debug!(job_id, "advance for unknown job (already cleaned up)");
        return;
      };
      match job.reader.next_event().await {
        Ok(Some(event)) => {
          trace!(job_id, ?event, "dispatching structural event");
          job.processor.process(event).await.err().map(|e| e.to_string())
        }
        Ok(None) => {
          debug!(job_id, "advance on exhausted reader");
          None
        }
        Err(e) => Some(format!("stream read failed: {e}")),
      }
    };
    if let Some(message) = failure {
      self.finish(job_id, Outcome::Failed(message)).await;
    }
  }

  // ==========================================================================
  // Cleanup
  // ==========================================================================

  /// The single cleanup path for both terminal states. Removing the job
  /// drops its reader; close problems cannot reach the caller. A second
  /// call for the same id is a no-op.
  async fn finish(&mut self, job_id: JobId, outcome: Outcome) {
    let Some(job) = self.jobs.remove(&job_id) else {
      debug!(job_id, "cleanup for unknown job (no-op)");
      return;
    };
    job.guard.cancel();
    let elapsed_ms = job.submitted_at.elapsed().as_millis() as u64;
    debug!(job_id, path = %job.path.display(), "closed document reader");

    let event = match outcome {
      Outcome::Completed => {
        info!(job_id, doc_type = %job.doc_type, elapsed_ms, "shredding job completed");
        JobEvent::Completed { job_id }
      }
      Outcome::Failed(message) => {
        error!(job_id, doc_type = %job.doc_type, elapsed_ms, error = %message, "shredding job failed");
        JobEvent::Failed { job_id, message }
      }
    };
    if let Some(events) = &self.events {
      if events.send(event).await.is_err() {
        debug!(job_id, "job event receiver dropped");
      }
    }
  }
}
