//! Processor providers and their registry
//!
//! A provider is a named, stateless factory: it claims document types and
//! binds fresh processor instances to job contexts. The hosting process
//! registers its providers once at startup; the registry is append-only
//! afterward.

use std::sync::Arc;

use crate::processor::{EventProcessor, ProcessorContext};

/// Factory for processors of a given document type.
///
/// Providers are shared across concurrent jobs, so implementations hold no
/// per-job state; everything job-scoped lives in the processor they bind.
pub trait ProcessorProvider: Send + Sync {
  /// The name of this provider (for logging/identification).
  fn name(&self) -> &str;

  /// Whether this provider handles the given document type.
  fn handles(&self, doc_type: &str) -> bool;

  /// Bind a fresh processor instance to a job context.
  fn provide(&self, context: ProcessorContext) -> Box<dyn EventProcessor>;
}

/// Append-only provider lookup table.
///
/// Resolution returns the first registered provider that claims the type:
/// registration order is the priority order, and that ordering is part of
/// the registry's contract.
#[derive(Default)]
pub struct ProviderRegistry {
  providers: Vec<Arc<dyn ProcessorProvider>>,
}

impl ProviderRegistry {
  /// Create an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a provider. Earlier registrations win ties.
  pub fn register(&mut self, provider: Arc<dyn ProcessorProvider>) {
    self.providers.push(provider);
  }

  /// Find the first provider claiming `doc_type`.
  pub fn resolve(&self, doc_type: &str) -> Option<Arc<dyn ProcessorProvider>> {
    self.providers.iter().find(|p| p.handles(doc_type)).cloned()
  }

  /// Number of registered providers.
  pub fn len(&self) -> usize {
    self.providers.len()
  }

  /// Whether any provider is registered.
  pub fn is_empty(&self) -> bool {
    self.providers.is_empty()
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::reader::XmlEvent;

  struct ClaimAll {
    name: &'static str,
  }

  struct Inert;

  #[async_trait::async_trait]
  impl crate::processor::EventProcessor for Inert {
    async fn process(&mut self, _event: XmlEvent) -> Result<(), crate::processor::ProcessorError> {
      Ok(())
    }
  }

  impl ProcessorProvider for ClaimAll {
    fn name(&self) -> &str {
      self.name
    }

    fn handles(&self, doc_type: &str) -> bool {
      doc_type == "x"
    }

    fn provide(&self, _context: ProcessorContext) -> Box<dyn EventProcessor> {
      Box::new(Inert)
    }
  }

  #[test]
  fn resolution_is_first_match_in_registration_order() {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ClaimAll { name: "a" }));
    registry.register(Arc::new(ClaimAll { name: "b" }));

    for _ in 0..3 {
      let resolved = registry.resolve("x").expect("both providers claim 'x'");
      assert_eq!(resolved.name(), "a");
    }
  }

  #[test]
  fn unclaimed_type_resolves_to_none() {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ClaimAll { name: "a" }));
    assert!(registry.resolve("y").is_none());
    assert_eq!(registry.len(), 1);
    assert!(!registry.is_empty());
  }
}
