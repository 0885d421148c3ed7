//! Committed read-path index
//!
//! The coordinator task is the only writer. Readers see whatever is committed
//! at the moment they look and never wait on imports in progress.

use std::sync::Arc;

use dashmap::DashMap;

use crate::domain::document::DocumentRecord;

/// Answer to a per-document query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
  Indexed(Arc<DocumentRecord>),
  NotIndexed,
}

impl QueryResult {
  pub fn is_indexed(&self) -> bool {
    matches!(self, Self::Indexed(_))
  }

  pub fn record(&self) -> Option<&DocumentRecord> {
    match self {
      Self::Indexed(record) => Some(record),
      Self::NotIndexed => None,
    }
  }
}

/// Shared view of every known document record.
///
/// Cheap to clone; all clones see the same records.
#[derive(Debug, Clone, Default)]
pub struct IndexStore {
  records: Arc<DashMap<String, Arc<DocumentRecord>>>,
}

impl IndexStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Committed metadata for a path.
  ///
  /// Unsupported documents and documents that never parsed successfully are
  /// `NotIndexed`. A document whose latest parse failed still answers with
  /// its last good metadata.
  pub fn lookup(&self, path: &str) -> QueryResult {
    match self.records.get(path) {
      Some(entry) if entry.is_queryable() => QueryResult::Indexed(Arc::clone(entry.value())),
      _ => QueryResult::NotIndexed,
    }
  }

  /// The raw record for a path, whatever its status.
  pub fn record(&self, path: &str) -> Option<Arc<DocumentRecord>> {
    self.records.get(path).map(|entry| Arc::clone(entry.value()))
  }

  /// Indexed paths carrying `tag` or one of its subtags, sorted.
  ///
  /// Matching ignores case and the leading `#`, so `project` matches
  /// `#Project` and `#project/alpha`.
  pub fn tagged(&self, tag: &str) -> Vec<String> {
    let wanted = tag.trim().trim_start_matches('#').to_lowercase();
    if wanted.is_empty() {
      return Vec::new();
    }
    let nested = format!("{}/", wanted);

    self.collect_indexed(|record| {
      record.metadata.as_ref().is_some_and(|meta| {
        meta.tags.iter().any(|t| {
          let t = t.trim_start_matches('#').to_lowercase();
          t == wanted || t.starts_with(&nested)
        })
      })
    })
  }

  /// Indexed paths that link to `path`, sorted.
  pub fn linking_to(&self, path: &str) -> Vec<String> {
    self.collect_indexed(|record| {
      record.path != path
        && record
          .metadata
          .as_ref()
          .is_some_and(|meta| meta.links.iter().any(|link| link.resolved == path))
    })
  }

  /// Every indexed path, sorted.
  pub fn paths(&self) -> Vec<String> {
    self.collect_indexed(|_| true)
  }

  /// Number of indexed documents
  pub fn len(&self) -> usize {
    self.records.iter().filter(|entry| entry.is_queryable()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Number of known documents, indexed or not
  pub fn total(&self) -> usize {
    self.records.len()
  }

  fn collect_indexed(&self, keep: impl Fn(&DocumentRecord) -> bool) -> Vec<String> {
    let mut paths: Vec<String> = self
      .records
      .iter()
      .filter(|entry| entry.is_queryable() && keep(entry.value()))
      .map(|entry| entry.key().clone())
      .collect();
    paths.sort_unstable();
    paths
  }

  // ========================================================================
  // Writes (coordinator only)
  // ========================================================================

  pub(crate) fn get(&self, path: &str) -> Option<Arc<DocumentRecord>> {
    self.record(path)
  }

  pub(crate) fn insert(&self, record: DocumentRecord) -> Option<Arc<DocumentRecord>> {
    self.records.insert(record.path.clone(), Arc::new(record))
  }

  pub(crate) fn remove(&self, path: &str) -> Option<Arc<DocumentRecord>> {
    self.records.remove(path).map(|(_, record)| record)
  }
}
