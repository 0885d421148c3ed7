//! Document sources
//!
//! The host owns the documents. During initialization the coordinator asks a
//! [`DocumentSource`] for the content of every path it was given; after that,
//! content arrives with each document-changed notification.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use ignore::WalkBuilder;
use tracing::debug;

/// Errors loading a document
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
  #[error("Document not found: {0}")]
  NotFound(String),
  #[error("Path escapes the document root: {0}")]
  OutsideRoot(String),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// Where document contents come from
#[async_trait]
pub trait DocumentSource: Send + Sync {
  async fn load(&self, path: &str) -> Result<Bytes, SourceError>;
}

// ============================================================================
// File system
// ============================================================================

/// Documents under a directory, addressed by `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
  root: PathBuf,
}

impl FsDocumentSource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Relative document path for a file under the root, if it is one.
  pub fn relative_path(&self, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(&self.root).ok()?;
    let parts: Vec<&str> = relative
      .components()
      .map(|c| c.as_os_str().to_str())
      .collect::<Option<_>>()?;
    if parts.is_empty() {
      return None;
    }
    Some(parts.join("/"))
  }

  /// Whether a path has one of the given extensions (case-insensitive).
  pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
  }

  /// Walk the root and list every document with a matching extension.
  ///
  /// Respects `.gitignore` and skips hidden files. Paths are sorted.
  pub fn discover(&self, extensions: &[String]) -> Vec<String> {
    let walker = WalkBuilder::new(&self.root)
      .hidden(true)
      .git_ignore(true)
      .git_global(true)
      .git_exclude(true)
      .build();

    let mut paths: Vec<String> = walker
      .flatten()
      .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
      .filter(|entry| Self::has_extension(entry.path(), extensions))
      .filter_map(|entry| self.relative_path(entry.path()))
      .collect();
    paths.sort_unstable();

    debug!(root = %self.root.display(), documents = paths.len(), "Discovered documents");
    paths
  }

  fn resolve(&self, path: &str) -> Result<PathBuf, SourceError> {
    if path.split('/').any(|part| part == "..") || Path::new(path).is_absolute() {
      return Err(SourceError::OutsideRoot(path.to_string()));
    }
    Ok(self.root.join(path))
  }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
  async fn load(&self, path: &str) -> Result<Bytes, SourceError> {
    let full = self.resolve(path)?;
    match tokio::fs::read(&full).await {
      Ok(content) => Ok(Bytes::from(content)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SourceError::NotFound(path.to_string())),
      Err(e) => Err(e.into()),
    }
  }
}

// ============================================================================
// In memory
// ============================================================================

/// Documents held in memory, for hosts that already have the content.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
  documents: Arc<DashMap<String, Bytes>>,
}

impl MemorySource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, path: impl Into<String>, content: impl Into<Bytes>) {
    self.documents.insert(path.into(), content.into());
  }

  pub fn remove(&self, path: &str) -> Option<Bytes> {
    self.documents.remove(path).map(|(_, content)| content)
  }

  /// Every stored path, sorted.
  pub fn paths(&self) -> Vec<String> {
    let mut paths: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
    paths.sort_unstable();
    paths
  }
}

#[async_trait]
impl DocumentSource for MemorySource {
  async fn load(&self, path: &str) -> Result<Bytes, SourceError> {
    self
      .documents
      .get(path)
      .map(|entry| entry.value().clone())
      .ok_or_else(|| SourceError::NotFound(path.to_string()))
  }
}
