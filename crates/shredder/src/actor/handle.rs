//! Engine handle
//!
//! Handles are cheap to clone and provide a way to send messages to the
//! engine. Request/response submission goes through [`ShredderHandle::submit`];
//! scheduling signals go through [`ShredderHandle::signal`], which never
//! waits, so it is safe to call from inside the engine's own dispatch loop.

use std::path::PathBuf;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::message::{JobId, ShredderMessage, SubmitError, SubmitRequest};

/// Handle to communicate with a [`ShredderActor`](crate::actor::ShredderActor).
#[derive(Clone, Debug)]
pub struct ShredderHandle {
  tx: mpsc::Sender<ShredderMessage>,
}

impl ShredderHandle {
  /// Create a new handle from a sender.
  pub fn new(tx: mpsc::Sender<ShredderMessage>) -> Self {
    Self { tx }
  }

  /// Submit a document for shredding and wait for the submission outcome.
  ///
  /// An `Ok` only means the job was accepted and its first advance was
  /// scheduled; the terminal outcome arrives later on the engine's event
  /// channel.
  pub async fn submit(
    &self,
    doc_type: impl Into<String>,
    path: impl Into<PathBuf>,
    job_id: JobId,
  ) -> Result<(), SubmitError> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    let msg = ShredderMessage::Submit {
      request: SubmitRequest {
        doc_type: doc_type.into(),
        path: path.into(),
        job_id,
      },
      reply: reply_tx,
    };
    self.tx.send(msg).await.map_err(|_| SubmitError::EngineUnavailable)?;
    match reply_rx.recv().await {
      Some(outcome) => outcome,
      None => Err(SubmitError::EngineUnavailable),
    }
  }

  /// Send a scheduling signal without waiting.
  ///
  /// Falls back to a spawned send when the mailbox is momentarily full, so a
  /// signal issued from within the dispatch loop can never deadlock the
  /// engine against its own mailbox. A signal for a stopped engine is
  /// dropped.
  pub fn signal(&self, msg: ShredderMessage) {
    match self.tx.try_send(msg) {
      Ok(()) => {}
      Err(TrySendError::Full(msg)) => {
        let tx = self.tx.clone();
        tokio::spawn(async move {
          if tx.send(msg).await.is_err() {
            debug!("dropping signal for stopped engine");
          }
        });
      }
      Err(TrySendError::Closed(_)) => debug!("dropping signal for stopped engine"),
    }
  }

  /// Request the engine to shut down after the current step.
  pub async fn shutdown(&self) -> Result<(), SendError> {
    self.tx.send(ShredderMessage::Shutdown).await.map_err(|_| SendError::ActorGone)
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Error when sending to an actor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("actor has shut down")]
  ActorGone,
}
