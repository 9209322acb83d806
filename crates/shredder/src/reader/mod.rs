//! Streaming XML pull reader
//!
//! An incremental tokenizer over any `AsyncRead` source. Each call to
//! [`XmlReader::next_event`] consumes just enough input to produce one
//! [`XmlEvent`]; nothing is buffered beyond the bytes of the current token,
//! so arbitrarily large documents parse in bounded memory.
//!
//! Coverage is what the shredding protocol consumes: element structure,
//! character data (including CDATA), the predefined and numeric entity
//! references. Comments, processing instructions, the XML declaration and
//! DOCTYPE are consumed and dropped. Namespaces are not expanded; names are
//! reported as written.

mod events;

use std::path::Path;

use memchr::memchr;
use tokio::{
  fs::File,
  io::{AsyncRead, AsyncReadExt},
};

pub use events::XmlEvent;

/// Reader over an opened file source.
pub type FileXmlReader = XmlReader<File>;

const READ_CHUNK: usize = 8 * 1024;
const BOM: &[u8] = b"\xef\xbb\xbf";
const MAX_ENTITY_LEN: usize = 10;

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced while pulling structural events from a source.
#[derive(Debug, thiserror::Error)]
pub enum XmlReadError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("malformed XML: {0}")]
  Syntax(String),
  #[error("mismatched end tag </{found}>, expected </{expected}>")]
  MismatchedTag { expected: String, found: String },
  #[error("unexpected end of input: {0}")]
  UnexpectedEof(&'static str),
  #[error("invalid entity reference '&{0};'")]
  InvalidEntity(String),
}

// ============================================================================
// XmlReader
// ============================================================================

/// Where the tokenizer is within the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
  /// Nothing emitted yet
  Fresh,
  /// `StartDocument` emitted, root element not yet seen
  Prolog,
  /// Inside the root element
  Content,
  /// Root element closed, trailing misc remains
  Epilogue,
  /// `EndDocument` emitted
  Done,
}

/// Pull-based structural event reader.
///
/// Holds a window of undecoded bytes and an open-element stack. All
/// tokenizer offsets are relative to the current read position; refills
/// compact the consumed prefix so relative offsets stay valid.
pub struct XmlReader<R> {
  src: R,
  buf: Vec<u8>,
  chunk: Vec<u8>,
  pos: usize,
  eof: bool,
  state: ReaderState,
  open: Vec<String>,
  pending_end: bool,
}

impl XmlReader<File> {
  /// Open a file source for streaming.
  ///
  /// Failure here means the source is unusable before any job state exists;
  /// malformed content only surfaces from later [`XmlReader::next_event`]
  /// calls.
  pub async fn open(path: impl AsRef<Path>) -> Result<FileXmlReader, XmlReadError> {
    let file = File::open(path.as_ref()).await?;
    Ok(Self::new(file))
  }
}

impl<R: AsyncRead + Unpin + Send> XmlReader<R> {
  /// Create a reader over an arbitrary byte source.
  pub fn new(src: R) -> Self {
    Self {
      src,
      buf: Vec::with_capacity(READ_CHUNK),
      chunk: vec![0u8; READ_CHUNK],
      pos: 0,
      eof: false,
      state: ReaderState::Fresh,
      open: Vec::new(),
      pending_end: false,
    }
  }

  /// Pull exactly one structural event.
  ///
  /// Returns `Ok(None)` once the document is exhausted; `EndDocument` is
  /// itself an event and is delivered before exhaustion.
  pub async fn next_event(&mut self) -> Result<Option<XmlEvent>, XmlReadError> {
    match self.state {
      ReaderState::Fresh => {
        if self.peek_starts_with(BOM).await? {
          self.pos += BOM.len();
        }
        self.state = ReaderState::Prolog;
        Ok(Some(XmlEvent::StartDocument))
      }
      ReaderState::Done => Ok(None),
      _ => self.pull().await,
    }
  }

  async fn pull(&mut self) -> Result<Option<XmlEvent>, XmlReadError> {
    if self.pending_end {
      self.pending_end = false;
      return self.close_element(None).map(Some);
    }

    loop {
      match self.state {
        ReaderState::Content => {
          self.fill(1).await?;
          if self.pos >= self.buf.len() {
            return Err(XmlReadError::UnexpectedEof("document truncated inside root element"));
          }
          if self.buf[self.pos] != b'<' {
            return self.read_text().await.map(Some);
          }
          if self.peek_starts_with(b"<!--").await? {
            self.skip_comment().await?;
          } else if self.peek_starts_with(b"<![CDATA[").await? {
            return self.read_cdata().await.map(Some);
          } else if self.peek_starts_with(b"<?").await? {
            self.skip_pi().await?;
          } else if self.peek_starts_with(b"</").await? {
            return self.read_end_tag().await.map(Some);
          } else {
            return self.read_start_tag().await.map(Some);
          }
        }
        ReaderState::Prolog | ReaderState::Epilogue => {
          self.skip_whitespace().await?;
          self.fill(1).await?;
          if self.pos >= self.buf.len() {
            if self.state == ReaderState::Prolog {
              return Err(XmlReadError::UnexpectedEof("document has no root element"));
            }
            self.state = ReaderState::Done;
            return Ok(Some(XmlEvent::EndDocument));
          }
          if self.buf[self.pos] != b'<' {
            return Err(self.misc_error("text"));
          }
          if self.peek_starts_with(b"<!--").await? {
            self.skip_comment().await?;
          } else if self.peek_starts_with(b"<?").await? {
            self.skip_pi().await?;
          } else if self.peek_starts_with(b"<!DOCTYPE").await? {
            if self.state == ReaderState::Epilogue {
              return Err(self.misc_error("DOCTYPE"));
            }
            self.skip_doctype().await?;
          } else if self.peek_starts_with(b"</").await? {
            return Err(XmlReadError::Syntax("end tag with no open element".into()));
          } else if self.state == ReaderState::Epilogue {
            return Err(self.misc_error("markup"));
          } else {
            return self.read_start_tag().await.map(Some);
          }
        }
        ReaderState::Fresh | ReaderState::Done => return Ok(None),
      }
    }
  }

  fn misc_error(&self, what: &str) -> XmlReadError {
    if self.state == ReaderState::Prolog {
      XmlReadError::Syntax(format!("{what} before the root element"))
    } else {
      XmlReadError::Syntax(format!("{what} after the root element"))
    }
  }

  // ==========================================================================
  // Token readers
  // ==========================================================================

  async fn read_start_tag(&mut self) -> Result<XmlEvent, XmlReadError> {
    let close = self.scan_tag_end().await?;
    let mut body_end = close;
    let self_closing = close > 1 && self.buf[self.pos + close - 1] == b'/';
    if self_closing {
      body_end -= 1;
    }
    let name = parse_tag_name(&self.buf[self.pos + 1..self.pos + body_end])?;
    self.pos += close + 1;
    self.open.push(name.clone());
    if self_closing {
      self.pending_end = true;
    }
    if self.state == ReaderState::Prolog {
      self.state = ReaderState::Content;
    }
    Ok(XmlEvent::StartElement { name })
  }

  async fn read_end_tag(&mut self) -> Result<XmlEvent, XmlReadError> {
    let close = self.scan_tag_end().await?;
    let body = &self.buf[self.pos + 2..self.pos + close];
    let found = std::str::from_utf8(body)
      .map_err(|_| XmlReadError::Syntax("invalid UTF-8 in end tag".into()))?
      .trim()
      .to_string();
    validate_name(found.as_bytes())?;
    self.pos += close + 1;
    self.close_element(Some(&found))
  }

  /// Pop the innermost open element, checking the end-tag name when present
  /// (synthesized ends for self-closing elements always match).
  fn close_element(&mut self, found: Option<&str>) -> Result<XmlEvent, XmlReadError> {
    let expected = match self.open.pop() {
      Some(name) => name,
      None => return Err(XmlReadError::Syntax("end tag with no open element".into())),
    };
    if let Some(found) = found {
      if found != expected {
        return Err(XmlReadError::MismatchedTag {
          expected,
          found: found.to_string(),
        });
      }
    }
    if self.open.is_empty() {
      self.state = ReaderState::Epilogue;
    }
    Ok(XmlEvent::EndElement { name: expected })
  }

  async fn read_text(&mut self) -> Result<XmlEvent, XmlReadError> {
    let mut offset = 0;
    let end = loop {
      if let Some(i) = memchr(b'<', &self.buf[self.pos + offset..]) {
        break offset + i;
      }
      offset = self.buf.len() - self.pos;
      if self.eof {
        return Err(XmlReadError::UnexpectedEof("document truncated inside root element"));
      }
      self.fill_more().await?;
    };
    let text = decode_text(&self.buf[self.pos..self.pos + end])?;
    self.pos += end;
    Ok(XmlEvent::Characters { text })
  }

  async fn read_cdata(&mut self) -> Result<XmlEvent, XmlReadError> {
    let start = b"<![CDATA[".len();
    let end = self.find_seq(b"]]>", start, "CDATA section is never closed").await?;
    let text = std::str::from_utf8(&self.buf[self.pos + start..self.pos + end])
      .map_err(|_| XmlReadError::Syntax("invalid UTF-8 in CDATA section".into()))?
      .to_string();
    self.pos += end + 3;
    Ok(XmlEvent::Characters { text })
  }

  async fn skip_comment(&mut self) -> Result<(), XmlReadError> {
    let end = self.find_seq(b"-->", 4, "comment is never closed").await?;
    self.pos += end + 3;
    Ok(())
  }

  async fn skip_pi(&mut self) -> Result<(), XmlReadError> {
    let end = self.find_seq(b"?>", 2, "processing instruction is never closed").await?;
    self.pos += end + 2;
    Ok(())
  }

  /// Skip a DOCTYPE declaration, including any internal subset. A `>` only
  /// terminates the declaration outside quotes and outside `[...]`.
  async fn skip_doctype(&mut self) -> Result<(), XmlReadError> {
    let mut offset = b"<!DOCTYPE".len();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    loop {
      while self.pos + offset < self.buf.len() {
        let b = self.buf[self.pos + offset];
        match quote {
          Some(q) => {
            if b == q {
              quote = None;
            }
          }
          None => match b {
            b'"' | b'\'' => quote = Some(b),
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'>' if depth == 0 => {
              self.pos += offset + 1;
              return Ok(());
            }
            _ => {}
          },
        }
        offset += 1;
      }
      if self.eof {
        return Err(XmlReadError::UnexpectedEof("DOCTYPE is never closed"));
      }
      self.fill_more().await?;
    }
  }

  /// Locate the `>` closing the tag that begins at the current position.
  /// Quoted attribute values may contain `>` and are skipped over.
  async fn scan_tag_end(&mut self) -> Result<usize, XmlReadError> {
    let mut offset = 1;
    let mut quote: Option<u8> = None;
    loop {
      while self.pos + offset < self.buf.len() {
        let b = self.buf[self.pos + offset];
        match quote {
          Some(q) => {
            if b == q {
              quote = None;
            }
          }
          None => match b {
            b'>' => return Ok(offset),
            b'"' | b'\'' => quote = Some(b),
            b'<' => return Err(XmlReadError::Syntax("'<' inside a tag".into())),
            _ => {}
          },
        }
        offset += 1;
      }
      if self.eof {
        return Err(XmlReadError::UnexpectedEof("tag is never closed"));
      }
      self.fill_more().await?;
    }
  }

  // ==========================================================================
  // Buffer management
  // ==========================================================================

  /// Find `needle` at or after `offset`, refilling as needed.
  /// Returns the match offset relative to the current position.
  async fn find_seq(&mut self, needle: &'static [u8], mut offset: usize, context: &'static str) -> Result<usize, XmlReadError> {
    loop {
      let hay_len = self.buf.len() - self.pos;
      let mut search = offset;
      let mut partial = None;
      while search < hay_len {
        match memchr(needle[0], &self.buf[self.pos + search..]) {
          Some(i) => {
            let cand = search + i;
            if cand + needle.len() <= hay_len {
              if &self.buf[self.pos + cand..self.pos + cand + needle.len()] == needle {
                return Ok(cand);
              }
              search = cand + 1;
            } else {
              // candidate straddles the window edge, re-check after refill
              partial = Some(cand);
              break;
            }
          }
          None => break,
        }
      }
      if self.eof {
        return Err(XmlReadError::UnexpectedEof(context));
      }
      offset = partial.unwrap_or(hay_len);
      self.fill_more().await?;
    }
  }

  async fn skip_whitespace(&mut self) -> Result<(), XmlReadError> {
    loop {
      while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_whitespace() {
        self.pos += 1;
      }
      if self.pos < self.buf.len() || self.eof {
        return Ok(());
      }
      self.fill_more().await?;
    }
  }

  async fn peek_starts_with(&mut self, prefix: &[u8]) -> Result<bool, XmlReadError> {
    self.fill(prefix.len()).await?;
    Ok(self.buf[self.pos..].starts_with(prefix))
  }

  /// Buffer at least `n` unconsumed bytes, or as many as remain before EOF.
  async fn fill(&mut self, n: usize) -> Result<(), XmlReadError> {
    while !self.eof && self.buf.len() - self.pos < n {
      self.fill_more().await?;
    }
    Ok(())
  }

  /// Read one more chunk from the source. Compacts the consumed prefix
  /// first, so offsets relative to the current position remain valid.
  async fn fill_more(&mut self) -> Result<(), XmlReadError> {
    if self.pos > 0 {
      self.buf.drain(..self.pos);
      self.pos = 0;
    }
    let n = self.src.read(&mut self.chunk).await?;
    if n == 0 {
      self.eof = true;
    } else {
      self.buf.extend_from_slice(&self.chunk[..n]);
    }
    Ok(())
  }
}

// ============================================================================
// Name and text helpers
// ============================================================================

fn is_name_start(b: u8) -> bool {
  b.is_ascii_alphabetic() || b == b'_' || b == b':' || b >= 0x80
}

fn is_name_byte(b: u8) -> bool {
  is_name_start(b) || b.is_ascii_digit() || b == b'-' || b == b'.'
}

fn validate_name(name: &[u8]) -> Result<(), XmlReadError> {
  match name.first() {
    None => return Err(XmlReadError::Syntax("missing element name".into())),
    Some(&b) if !is_name_start(b) => {
      return Err(XmlReadError::Syntax(format!("invalid element name start byte 0x{b:02x}")));
    }
    _ => {}
  }
  if let Some(&b) = name.iter().find(|&&b| !is_name_byte(b)) {
    return Err(XmlReadError::Syntax(format!("invalid byte 0x{b:02x} in element name")));
  }
  Ok(())
}

/// Extract the element name from a start-tag body (attributes follow the
/// first whitespace and are not surfaced).
fn parse_tag_name(body: &[u8]) -> Result<String, XmlReadError> {
  let end = body.iter().position(|b| b.is_ascii_whitespace()).unwrap_or(body.len());
  let name = &body[..end];
  validate_name(name)?;
  let name = std::str::from_utf8(name).map_err(|_| XmlReadError::Syntax("invalid UTF-8 in element name".into()))?;
  Ok(name.to_string())
}

/// Decode a run of character data, resolving entity references.
fn decode_text(raw: &[u8]) -> Result<String, XmlReadError> {
  let text =
    std::str::from_utf8(raw).map_err(|_| XmlReadError::Syntax("invalid UTF-8 in character data".into()))?;
  if memchr(b'&', raw).is_none() {
    return Ok(text.to_string());
  }
  let mut out = String::with_capacity(text.len());
  let mut rest = text;
  while let Some(amp) = rest.find('&') {
    out.push_str(&rest[..amp]);
    let tail = &rest[amp + 1..];
    let semi = match tail.find(';') {
      Some(i) if i <= MAX_ENTITY_LEN => i,
      _ => return Err(XmlReadError::InvalidEntity(tail.chars().take(8).collect())),
    };
    let entity = &tail[..semi];
    out.push(resolve_entity(entity)?);
    rest = &tail[semi + 1..];
  }
  out.push_str(rest);
  Ok(out)
}

fn resolve_entity(entity: &str) -> Result<char, XmlReadError> {
  match entity {
    "amp" => Ok('&'),
    "lt" => Ok('<'),
    "gt" => Ok('>'),
    "apos" => Ok('\''),
    "quot" => Ok('"'),
    _ => {
      let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
      } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse().ok()
      } else {
        None
      };
      code
        .and_then(char::from_u32)
        .ok_or_else(|| XmlReadError::InvalidEntity(entity.to_string()))
    }
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
  };

  use pretty_assertions::assert_eq;
  use tokio::io::ReadBuf;

  use super::*;

  async fn collect(xml: &str) -> Result<Vec<XmlEvent>, XmlReadError> {
    let mut reader = XmlReader::new(xml.as_bytes());
    let mut events = Vec::new();
    while let Some(event) = reader.next_event().await? {
      events.push(event);
    }
    Ok(events)
  }

  fn start(name: &str) -> XmlEvent {
    XmlEvent::StartElement { name: name.to_string() }
  }

  fn end(name: &str) -> XmlEvent {
    XmlEvent::EndElement { name: name.to_string() }
  }

  fn text(content: &str) -> XmlEvent {
    XmlEvent::Characters {
      text: content.to_string(),
    }
  }

  #[tokio::test]
  async fn simple_document() {
    let events = collect(r#"<?xml version="1.0"?><library><book id="1">Rust</book><book/></library>"#)
      .await
      .unwrap();
    assert_eq!(
      events,
      vec![
        XmlEvent::StartDocument,
        start("library"),
        start("book"),
        text("Rust"),
        end("book"),
        start("book"),
        end("book"),
        end("library"),
        XmlEvent::EndDocument,
      ]
    );
  }

  #[tokio::test]
  async fn whitespace_between_elements_is_character_data() {
    let events = collect("<a>\n  <b/>\n</a>").await.unwrap();
    assert_eq!(
      events,
      vec![
        XmlEvent::StartDocument,
        start("a"),
        text("\n  "),
        start("b"),
        end("b"),
        text("\n"),
        end("a"),
        XmlEvent::EndDocument,
      ]
    );
  }

  #[tokio::test]
  async fn entities_are_decoded() {
    let events = collect("<a>&lt;x&gt; &amp; &#65;&#x42;</a>").await.unwrap();
    assert_eq!(events[2], text("<x> & AB"));
  }

  #[tokio::test]
  async fn cdata_is_character_data() {
    let events = collect("<a><![CDATA[<raw> & ]]&]]></a>").await.unwrap();
    assert_eq!(events[2], text("<raw> & ]]&"));
  }

  #[tokio::test]
  async fn comments_and_pis_are_skipped() {
    let events = collect("<?xml version=\"1.0\"?><!-- top --><a><!-- in --><?pi data?><b/></a><!-- tail -->")
      .await
      .unwrap();
    assert_eq!(
      events,
      vec![
        XmlEvent::StartDocument,
        start("a"),
        start("b"),
        end("b"),
        end("a"),
        XmlEvent::EndDocument,
      ]
    );
  }

  #[tokio::test]
  async fn doctype_with_internal_subset_is_skipped() {
    let events = collect("<!DOCTYPE library [<!ELEMENT book (#PCDATA)>]><library/>").await.unwrap();
    assert_eq!(
      events,
      vec![XmlEvent::StartDocument, start("library"), end("library"), XmlEvent::EndDocument,]
    );
  }

  #[tokio::test]
  async fn bom_is_skipped() {
    let mut source = Vec::from(BOM);
    source.extend_from_slice(b"<a/>");
    let mut reader = XmlReader::new(source.as_slice());
    assert_eq!(reader.next_event().await.unwrap(), Some(XmlEvent::StartDocument));
    assert_eq!(reader.next_event().await.unwrap(), Some(start("a")));
  }

  #[tokio::test]
  async fn attribute_values_may_contain_markup_characters() {
    let events = collect(r#"<a href="x>y"><b note='1 < 2 is "fine"'/></a>"#).await.unwrap();
    assert_eq!(
      events,
      vec![
        XmlEvent::StartDocument,
        start("a"),
        start("b"),
        end("b"),
        end("a"),
        XmlEvent::EndDocument,
      ]
    );
  }

  #[tokio::test]
  async fn exhausted_reader_returns_none() {
    let mut reader = XmlReader::new(&b"<a/>"[..]);
    while reader.next_event().await.unwrap().is_some() {}
    assert_eq!(reader.next_event().await.unwrap(), None);
    assert_eq!(reader.next_event().await.unwrap(), None);
  }

  #[tokio::test]
  async fn mismatched_end_tag_is_an_error() {
    let mut reader = XmlReader::new(&b"<a><b></a>"[..]);
    assert_eq!(reader.next_event().await.unwrap(), Some(XmlEvent::StartDocument));
    assert_eq!(reader.next_event().await.unwrap(), Some(start("a")));
    assert_eq!(reader.next_event().await.unwrap(), Some(start("b")));
    let err = reader.next_event().await.unwrap_err();
    assert!(matches!(
      err,
      XmlReadError::MismatchedTag { expected, found } if expected == "b" && found == "a"
    ));
  }

  #[tokio::test]
  async fn truncated_document_is_an_error() {
    let mut reader = XmlReader::new(&b"<a><b>"[..]);
    for _ in 0..3 {
      reader.next_event().await.unwrap();
    }
    assert!(matches!(reader.next_event().await, Err(XmlReadError::UnexpectedEof(_))));
  }

  #[tokio::test]
  async fn content_after_root_is_an_error() {
    let mut reader = XmlReader::new(&b"<a/>junk"[..]);
    for _ in 0..3 {
      reader.next_event().await.unwrap();
    }
    assert!(matches!(reader.next_event().await, Err(XmlReadError::Syntax(_))));
  }

  #[tokio::test]
  async fn missing_root_is_an_error() {
    let mut reader = XmlReader::new(&b"<?xml version=\"1.0\"?>  "[..]);
    reader.next_event().await.unwrap();
    assert!(matches!(reader.next_event().await, Err(XmlReadError::UnexpectedEof(_))));
  }

  #[tokio::test]
  async fn unknown_entity_is_an_error() {
    let mut reader = XmlReader::new(&b"<a>&nope;</a>"[..]);
    reader.next_event().await.unwrap();
    reader.next_event().await.unwrap();
    assert!(matches!(reader.next_event().await, Err(XmlReadError::InvalidEntity(e)) if e == "nope"));
  }

  /// Source that trickles three bytes per read, forcing every token to be
  /// assembled across refill boundaries.
  struct Dribble<'a> {
    data: &'a [u8],
    pos: usize,
  }

  impl AsyncRead for Dribble<'_> {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
      let this = self.get_mut();
      let n = (this.data.len() - this.pos).min(3);
      buf.put_slice(&this.data[this.pos..this.pos + n]);
      this.pos += n;
      Poll::Ready(Ok(()))
    }
  }

  #[tokio::test]
  async fn tokens_assemble_across_refills() {
    let xml = b"<!-- preamble --><catalog><![CDATA[chunked content]]><entry kind=\"x>y\">&amp;done</entry></catalog>";
    let mut reader = XmlReader::new(Dribble { data: xml, pos: 0 });
    let mut events = Vec::new();
    while let Some(event) = reader.next_event().await.unwrap() {
      events.push(event);
    }
    assert_eq!(
      events,
      vec![
        XmlEvent::StartDocument,
        start("catalog"),
        text("chunked content"),
        start("entry"),
        text("&done"),
        end("entry"),
        end("catalog"),
        XmlEvent::EndDocument,
      ]
    );
  }
}
