//! Processor protocol
//!
//! A processor is the per-job logic bound by a provider when a job is
//! accepted. It reacts to exactly one structural event per invocation and
//! talks back through its [`ProcessorContext`]: request the next event,
//! report completion, report an error.
//!
//! The engine never schedules an advance on its own after dispatch, so a
//! processor that needs to wait (a registration handshake in flight, a full
//! downstream queue) just returns without requesting, and resumes the job
//! later from whatever task observes the reply. The resulting per-job state
//! machine is:
//!
//! ```text
//! Idle → AwaitingHandshake → Streaming ⇄ Backpressured → Completed
//!                                                      ↘ Errored
//! ```
//!
//! `Completed` and `Errored` are absorbing: the engine deletes the job on
//! either signal.

mod context;

use async_trait::async_trait;

pub use context::ProcessorContext;

use crate::reader::XmlEvent;

/// Stateful per-job event logic.
///
/// Implementations must return promptly; anything that waits belongs in a
/// spawned task holding a clone of the context.
#[async_trait]
pub trait EventProcessor: Send {
  /// React to one structural event.
  ///
  /// An `Err` is converted by the engine into the job's error signal, which
  /// triggers cleanup. Errors detected outside an invocation (in a spawned
  /// task) are reported through [`ProcessorContext::fail`] instead.
  async fn process(&mut self, event: XmlEvent) -> Result<(), ProcessorError>;
}

/// Non-recoverable processor failures.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
  /// An event that needs the downstream handshake arrived before the
  /// handshake reply
  #[error("downstream handshake has not completed")]
  HandshakeIncomplete,
  /// The downstream registrar refused or vanished during the handshake
  #[error("downstream handshake rejected: {0}")]
  HandshakeRejected(String),
  /// The downstream consumer dropped its end of the fact queue
  #[error("downstream consumer is gone")]
  SinkClosed,
  /// Anything else a processor implementation wants to surface
  #[error("{0}")]
  Other(String),
}
