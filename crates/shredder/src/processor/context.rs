//! Per-job processor context
//!
//! Created by the engine when a job is accepted and handed to the provider
//! that binds the processor. The context is the processor's only way back
//! into the engine: request the next event, report completion, report an
//! error. Contexts are immutable once constructed and cheap to clone into
//! spawned tasks, which is how a processor resumes a job after an
//! out-of-step reply (handshake, drain) without the engine's involvement.

use std::{collections::HashMap, sync::Arc};

use crate::actor::{JobId, ShredderHandle, ShredderMessage};

/// Execution context bound to exactly one job.
#[derive(Clone, Debug)]
pub struct ProcessorContext {
  job_id: JobId,
  engine: ShredderHandle,
  properties: Arc<HashMap<String, String>>,
}

impl ProcessorContext {
  /// Create a context for a job.
  pub fn new(job_id: JobId, engine: ShredderHandle) -> Self {
    Self {
      job_id,
      engine,
      properties: Arc::new(HashMap::new()),
    }
  }

  /// Attach string properties for the provider to read.
  pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
    self.properties = Arc::new(properties);
    self
  }

  /// The job this context belongs to.
  pub fn job_id(&self) -> JobId {
    self.job_id
  }

  /// Look up a string property.
  pub fn property(&self, name: &str) -> Option<&str> {
    self.properties.get(name).map(String::as_str)
  }

  /// Ask the engine to pull and dispatch the next structural event.
  /// Withholding this call is how a processor pauses its job.
  pub fn request_next(&self) {
    self.engine.signal(ShredderMessage::Advance { job_id: self.job_id });
  }

  /// Report terminal success. The engine cleans the job up; no further
  /// events will be dispatched.
  pub fn finished(&self) {
    self.engine.signal(ShredderMessage::Complete { job_id: self.job_id });
  }

  /// Report a non-recoverable error. The engine cleans the job up.
  pub fn fail(&self, message: impl Into<String>) {
    self.engine.signal(ShredderMessage::Fail {
      job_id: self.job_id,
      message: message.into(),
    });
  }
}
