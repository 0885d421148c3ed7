//! Format-specific parsers
//!
//! A parser turns the raw content of one document into [`ParsedMetadata`].
//! Parsers are looked up by format tag in a [`ParserRegistry`]; formats with no
//! registered parser are reported as unsupported by the import worker.

mod markdown;

use std::{collections::HashMap, fmt, sync::Arc};

pub use markdown::MarkdownImporter;

use crate::{actor::message::ImportMetadata, domain::document::ParsedMetadata};

/// Errors a parser may report for malformed content
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
  #[error("Invalid frontmatter on line {line}: {reason}")]
  Frontmatter { line: usize, reason: String },
  #[error("Malformed content: {0}")]
  Malformed(String),
}

/// A parser for one document format.
///
/// Implementations must be stateless across calls: the same content and
/// metadata always produce the same result.
pub trait DocumentParser: Send + Sync {
  /// Format tag this parser handles
  fn format(&self) -> &'static str;

  /// Parse one document.
  fn parse(&self, path: &str, content: &str, metadata: &ImportMetadata) -> Result<ParsedMetadata, ParseError>;
}

/// Format tag → parser lookup shared by every import worker.
#[derive(Clone, Default)]
pub struct ParserRegistry {
  parsers: HashMap<String, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
  /// An empty registry: every format is unsupported.
  pub fn new() -> Self {
    Self::default()
  }

  /// The built-in parsers (markdown only).
  pub fn with_defaults() -> Self {
    Self::new().with(MarkdownImporter::new())
  }

  /// Register a parser, replacing any parser for the same format.
  pub fn with(mut self, parser: impl DocumentParser + 'static) -> Self {
    self.register(Arc::new(parser));
    self
  }

  pub fn register(&mut self, parser: Arc<dyn DocumentParser>) {
    self.parsers.insert(parser.format().to_string(), parser);
  }

  pub fn get(&self, format: &str) -> Option<&Arc<dyn DocumentParser>> {
    self.parsers.get(format)
  }

  /// Registered format tags, sorted.
  pub fn formats(&self) -> Vec<&str> {
    let mut formats: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
    formats.sort_unstable();
    formats
  }
}

impl fmt::Debug for ParserRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ParserRegistry").field("formats", &self.formats()).finish()
  }
}
