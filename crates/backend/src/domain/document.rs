use std::{
  collections::{BTreeMap, BTreeSet},
  path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Format tag for markdown notes
pub const FORMAT_MARKDOWN: &str = "markdown";
/// Format tag for canvas boards
pub const FORMAT_CANVAS: &str = "canvas";
/// Format tag for paths without an extension
pub const FORMAT_UNKNOWN: &str = "unknown";

/// Compute a content fingerprint for change detection
///
/// Uses SHA-256 truncated to 16 hex chars for compact storage
/// while still having negligible collision probability.
pub fn compute_content_hash(content: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(content);
  let result = hasher.finalize();
  hex::encode(&result[..8])
}

/// Derive the format discriminant for a document from its path extension.
pub fn format_for_path(path: &str) -> String {
  let ext = Path::new(path)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| ext.to_lowercase());

  match ext.as_deref() {
    Some("md") | Some("markdown") => FORMAT_MARKDOWN.to_string(),
    Some("canvas") => FORMAT_CANVAS.to_string(),
    Some(other) => other.to_string(),
    None => FORMAT_UNKNOWN.to_string(),
  }
}

/// Structured metadata extracted from a single document by a parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMetadata {
  /// Tags, normalized with a leading `#`
  #[serde(default)]
  pub tags: BTreeSet<String>,
  /// Outgoing links in document order
  #[serde(default)]
  pub links: Vec<Link>,
  /// Frontmatter key/value pairs
  #[serde(default)]
  pub frontmatter: BTreeMap<String, serde_json::Value>,
  /// Top-level sections; nested headings live in `children`
  #[serde(default)]
  pub sections: Vec<Section>,
  /// Inline `key:: value` fields (empty when inline field indexing is off)
  #[serde(default)]
  pub inline_fields: Vec<InlineField>,
}

impl ParsedMetadata {
  /// Depth-first iterator over every section in the tree.
  pub fn all_sections(&self) -> Vec<&Section> {
    fn walk<'a>(sections: &'a [Section], out: &mut Vec<&'a Section>) {
      for section in sections {
        out.push(section);
        walk(&section.children, out);
      }
    }

    let mut out = Vec::new();
    walk(&self.sections, &mut out);
    out
  }

  /// Find the first section with the given title anywhere in the tree.
  pub fn section(&self, title: &str) -> Option<&Section> {
    self.all_sections().into_iter().find(|s| s.title == title)
  }
}

/// A heading-delimited region of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
  pub title: String,
  /// Heading level (1-6)
  pub level: u8,
  /// Zero-based line of the heading
  pub start_line: usize,
  /// Zero-based last line belonging to this section (inclusive)
  pub end_line: usize,
  #[serde(default)]
  pub children: Vec<Section>,
}

/// An outgoing link from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
  /// Link target as written in the document
  pub target: String,
  /// Target path resolved against the linking document's folder
  pub resolved: String,
  /// Heading or block anchor (`#...`), if any
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub anchor: Option<String>,
  /// Display text, if any
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display: Option<String>,
  /// True for embeds (`![[...]]`)
  #[serde(default)]
  pub embed: bool,
  /// Zero-based line the link appears on
  pub line: usize,
}

/// An inline `key:: value` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineField {
  pub key: String,
  pub value: String,
  pub line: usize,
}

/// Indexing status of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
  /// Queued or loading; never parsed at the current generation
  Pending,
  /// Metadata reflects the current generation
  Indexed,
  /// The last parse failed; `metadata` holds the last-known-good value
  Failed { message: String },
  /// Format has no parser; excluded from queries
  Unsupported,
}

/// The coordinator's view of a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
  /// Stable path identity
  pub path: String,
  /// Format discriminant derived from the path
  pub format: String,
  /// Fingerprint of the most recently queued content
  pub fingerprint: Option<String>,
  /// Bumped every time the document is queued
  pub generation: u64,
  /// Last successfully parsed metadata
  pub metadata: Option<ParsedMetadata>,
  pub status: DocumentStatus,
  /// When metadata was last replaced by a successful parse
  pub last_parsed: Option<DateTime<Utc>>,
}

impl DocumentRecord {
  /// Create a record on first sighting of a path.
  pub fn new(path: impl Into<String>) -> Self {
    let path = path.into();
    Self {
      format: format_for_path(&path),
      path,
      fingerprint: None,
      generation: 0,
      metadata: None,
      status: DocumentStatus::Pending,
      last_parsed: None,
    }
  }

  pub fn is_failed(&self) -> bool {
    matches!(self.status, DocumentStatus::Failed { .. })
  }

  pub fn is_unsupported(&self) -> bool {
    matches!(self.status, DocumentStatus::Unsupported)
  }

  /// Whether this record answers queries: it must have committed metadata
  /// and a format that is in scope for indexing.
  pub fn is_queryable(&self) -> bool {
    self.metadata.is_some() && !self.is_unsupported()
  }
}
