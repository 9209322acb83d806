//! Tag-name counting consumer
//!
//! The illustrative document handler: counts element starts by tag name.
//! One [`TagNameProcessor`] is bound per job; all of them feed a shared
//! [`StatsActor`] through the bounded fact queue, which is where downstream
//! backpressure comes from.
//!
//! The processor is also the reference walkthrough of the protocol: an
//! asynchronous registration handshake on document start, fail-fast fact
//! writes with deferred resume under backpressure, and completion only
//! after the terminal fact is accepted downstream.

mod stats;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

pub use stats::{StatsActor, StatsHandle, StatsMessage, TagFact, TagStatsSnapshot};

use crate::{
  processor::{EventProcessor, ProcessorContext, ProcessorError},
  provider::ProcessorProvider,
  reader::XmlEvent,
  sink::{BoundedSink, WriteError},
};

/// Document type claimed by [`TagNameProvider`].
pub const TAG_COUNT_DOC_TYPE: &str = "tag-count";

// ============================================================================
// Provider
// ============================================================================

/// Binds tag-name processors to jobs of type `tag-count`.
pub struct TagNameProvider {
  stats: StatsHandle,
}

impl TagNameProvider {
  /// Create a provider feeding the given stats actor.
  pub fn new(stats: StatsHandle) -> Self {
    Self { stats }
  }
}

impl ProcessorProvider for TagNameProvider {
  fn name(&self) -> &str {
    "tag-name"
  }

  fn handles(&self, doc_type: &str) -> bool {
    doc_type == TAG_COUNT_DOC_TYPE
  }

  fn provide(&self, context: ProcessorContext) -> Box<dyn EventProcessor> {
    debug!(job_id = context.job_id(), "binding tag-name processor");
    Box::new(TagNameProcessor::new(context, self.stats.clone()))
  }
}

// ============================================================================
// Processor
// ============================================================================

/// Which signal to send once a fact has landed downstream.
#[derive(Clone, Copy)]
enum Resume {
  NextEvent,
  Finished,
}

/// Per-job processor that emits one fact per element start.
pub struct TagNameProcessor {
  ctx: ProcessorContext,
  stats: StatsHandle,
  facts: Option<BoundedSink<TagFact>>,
  /// Carries the handshake reply from the registration task into the
  /// processor; resolved before the first post-handshake event arrives
  handshake: Option<mpsc::Receiver<BoundedSink<TagFact>>>,
}

impl TagNameProcessor {
  fn new(ctx: ProcessorContext, stats: StatsHandle) -> Self {
    Self {
      ctx,
      stats,
      facts: None,
      handshake: None,
    }
  }

  /// Register with the stats actor off-loop. The job resumes only after
  /// the reply lands: the spawned task hands the sink over, then requests
  /// the next event.
  fn begin_handshake(&mut self) {
    let (tx, rx) = mpsc::channel(1);
    self.handshake = Some(rx);
    let ctx = self.ctx.clone();
    let stats = self.stats.clone();
    tokio::spawn(async move {
      match stats.register(ctx.job_id()).await {
        Ok(sink) => {
          let _ = tx.send(sink).await;
          ctx.request_next();
        }
        Err(e) => ctx.fail(format!("stats handshake rejected: {e}")),
      }
    });
  }

  /// The fact sink, claimed from the handshake reply on first use.
  fn sink(&mut self) -> Result<BoundedSink<TagFact>, ProcessorError> {
    if let Some(mut rx) = self.handshake.take() {
      let sink = rx.try_recv().map_err(|_| ProcessorError::HandshakeIncomplete)?;
      self.facts = Some(sink);
    }
    self.facts.clone().ok_or(ProcessorError::HandshakeIncomplete)
  }

  /// Forward a fact downstream, then schedule the follow-up signal. A full
  /// queue defers both the write and the signal until capacity frees, which
  /// is what pauses this job while the consumer is behind.
  fn forward(&mut self, fact: TagFact, resume: Resume) -> Result<(), ProcessorError> {
    let sink = self.sink()?;
    match sink.try_write(fact) {
      Ok(()) => {
        self.resume(resume);
        Ok(())
      }
      Err(WriteError::Closed(_)) => Err(ProcessorError::SinkClosed),
      Err(WriteError::Full(fact)) => {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
          match sink.write(fact).await {
            Ok(()) => match resume {
              Resume::NextEvent => ctx.request_next(),
              Resume::Finished => ctx.finished(),
            },
            Err(_) => ctx.fail("tag statistics consumer is gone"),
          }
        });
        Ok(())
      }
    }
  }

  fn resume(&self, resume: Resume) {
    match resume {
      Resume::NextEvent => self.ctx.request_next(),
      Resume::Finished => self.ctx.finished(),
    }
  }
}

#[async_trait]
impl EventProcessor for TagNameProcessor {
  async fn process(&mut self, event: XmlEvent) -> Result<(), ProcessorError> {
    match event {
      XmlEvent::StartDocument => {
        self.begin_handshake();
        Ok(())
      }
      XmlEvent::StartElement { name } => {
        let fact = TagFact::Element {
          job_id: self.ctx.job_id(),
          name,
        };
        self.forward(fact, Resume::NextEvent)
      }
      XmlEvent::EndElement { .. } | XmlEvent::Characters { .. } => {
        self.ctx.request_next();
        Ok(())
      }
      XmlEvent::EndDocument => {
        let fact = TagFact::Finished { job_id: self.ctx.job_id() };
        self.forward(fact, Resume::Finished)
      }
    }
  }
}
