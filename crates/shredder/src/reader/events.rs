//! Structural event types
//!
//! The streaming reader reduces a document to a flat sequence of these
//! events, one per pull. Element attributes are validated during
//! tokenization but not surfaced; downstream processors only consume
//! names and character data.

/// One atomic unit of document structure.
///
/// A well-formed document always yields `StartDocument` first and
/// `EndDocument` last, with balanced element pairs in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
  /// Emitted once, before any bytes are consumed
  StartDocument,
  /// Opening tag (self-closing elements also yield a matching `EndElement`)
  StartElement {
    /// Qualified element name, undecoded
    name: String,
  },
  /// Closing tag
  EndElement {
    /// Qualified element name, undecoded
    name: String,
  },
  /// A run of character data (text or CDATA), entities resolved
  Characters {
    /// Decoded text content
    text: String,
  },
  /// Emitted once, after the root element and any trailing misc
  EndDocument,
}

impl XmlEvent {
  /// Returns true for the terminal event of a document.
  pub fn is_end_of_document(&self) -> bool {
    matches!(self, Self::EndDocument)
  }
}
