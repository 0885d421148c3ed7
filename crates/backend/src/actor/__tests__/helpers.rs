//! Test helpers for actor integration tests.
//!
//! Provides `IndexTestContext`, which spawns an IndexCoordinator over an
//! in-memory document source, and `ProbeParser`, a parser for the `probe`
//! format whose behaviour is scripted by the document content and which
//! records how it was called.
//!
//! Probe content is `<millis>|<text>`: sleep for `millis`, then succeed with
//! `text` stored under the `content` frontmatter key. Variants:
//! - `once:<millis>|<text>` sleeps only on the first attempt for a path
//! - `fail` returns a parse error
//! - `panic` panics inside the parser

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
  actor::{
    coordinator::IndexCoordinator,
    handle::IndexHandle,
    message::ImportMetadata,
    source::MemorySource,
    status::IndexState,
  },
  domain::{
    config::{CoordinatorConfig, PoolConfig},
    document::ParsedMetadata,
  },
  import::{DocumentParser, ParseError, ParserRegistry},
};

// ============================================================================
// Probe parser
// ============================================================================

/// What the probe parser observed
#[derive(Debug, Default)]
pub struct ProbeStats {
  active: Mutex<HashSet<String>>,
  attempts: Mutex<HashMap<String, usize>>,
  parsed: Mutex<Vec<(String, String)>>,
  current: AtomicUsize,
  max: AtomicUsize,
  duplicates: AtomicUsize,
}

impl ProbeStats {
  /// Highest number of probe parses running at once
  pub fn max_concurrent(&self) -> usize {
    self.max.load(Ordering::SeqCst)
  }

  /// Times a path was being parsed twice at once
  pub fn duplicates(&self) -> usize {
    self.duplicates.load(Ordering::SeqCst)
  }

  pub fn is_active(&self, path: &str) -> bool {
    self.active.lock().expect("active lock").contains(path)
  }

  pub fn attempts(&self, path: &str) -> usize {
    self.attempts.lock().expect("attempts lock").get(path).copied().unwrap_or(0)
  }

  /// `(path, text)` of every successful probe parse, in completion order
  pub fn parsed(&self) -> Vec<(String, String)> {
    self.parsed.lock().expect("parsed lock").clone()
  }

  pub fn was_parsed(&self, path: &str) -> bool {
    self.parsed().iter().any(|(p, _)| p == path)
  }

  fn enter(&self, path: &str) -> usize {
    let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.max.fetch_max(running, Ordering::SeqCst);
    if !self.active.lock().expect("active lock").insert(path.to_string()) {
      self.duplicates.fetch_add(1, Ordering::SeqCst);
    }
    let mut attempts = self.attempts.lock().expect("attempts lock");
    let count = attempts.entry(path.to_string()).or_insert(0);
    *count += 1;
    *count
  }

  fn exit(&self, path: &str) {
    self.current.fetch_sub(1, Ordering::SeqCst);
    self.active.lock().expect("active lock").remove(path);
  }
}

pub struct ProbeParser {
  stats: Arc<ProbeStats>,
}

impl DocumentParser for ProbeParser {
  fn format(&self) -> &'static str {
    "probe"
  }

  fn parse(&self, path: &str, content: &str, _metadata: &ImportMetadata) -> Result<ParsedMetadata, ParseError> {
    let attempt = self.stats.enter(path);
    let outcome = run_probe(content, attempt);
    if let Ok(text) = &outcome {
      self.stats.parsed.lock().expect("parsed lock").push((path.to_string(), text.clone()));
    }
    self.stats.exit(path);

    match outcome {
      Ok(text) => {
        let mut metadata = ParsedMetadata::default();
        metadata
          .frontmatter
          .insert("content".to_string(), serde_json::Value::String(text));
        Ok(metadata)
      }
      Err(ProbeFault::Fail) => Err(ParseError::Malformed("probe asked to fail".to_string())),
      Err(ProbeFault::Panic) => panic!("probe asked to panic"),
    }
  }
}

enum ProbeFault {
  Fail,
  Panic,
}

fn run_probe(content: &str, attempt: usize) -> Result<String, ProbeFault> {
  match content {
    "fail" => return Err(ProbeFault::Fail),
    "panic" => return Err(ProbeFault::Panic),
    _ => {}
  }
  let (once, rest) = match content.strip_prefix("once:") {
    Some(rest) => (true, rest),
    None => (false, content),
  };
  let (millis, text) = rest.split_once('|').unwrap_or(("0", rest));
  let millis: u64 = millis.parse().unwrap_or(0);
  if !once || attempt == 1 {
    std::thread::sleep(Duration::from_millis(millis));
  }
  Ok(text.to_string())
}

/// Probe document content
pub fn probe(millis: u64, text: &str) -> String {
  format!("{}|{}", millis, text)
}

/// Probe document content that only sleeps on its first attempt
pub fn probe_once(millis: u64, text: &str) -> String {
  format!("once:{}|{}", millis, text)
}

// ============================================================================
// Context
// ============================================================================

/// Test context for coordinator integration tests.
pub struct IndexTestContext {
  pub source: MemorySource,
  pub probe: Arc<ProbeStats>,
  pub config: CoordinatorConfig,
}

impl IndexTestContext {
  /// A context with `threads` workers at full utilization.
  pub fn new(threads: usize) -> Self {
    let config = CoordinatorConfig {
      pool: PoolConfig {
        threads,
        utilization: 1.0,
        job_timeout: Duration::from_secs(10),
        throttle_window: Duration::from_millis(100),
      },
      index_inline_fields: true,
      load_concurrency: 4,
      shutdown_grace: Duration::from_secs(1),
    };
    Self {
      source: MemorySource::new(),
      probe: Arc::new(ProbeStats::default()),
      config,
    }
  }

  pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
    self.config.pool.job_timeout = timeout;
    self
  }

  pub fn parsers(&self) -> ParserRegistry {
    ParserRegistry::with_defaults().with(ProbeParser {
      stats: Arc::clone(&self.probe),
    })
  }

  /// Spawn an IndexCoordinator and return its handle and cancellation token.
  pub fn spawn(&self) -> (IndexHandle, CancellationToken) {
    let cancel = CancellationToken::new();
    let handle = IndexCoordinator::spawn(
      self.config.clone(),
      self.parsers(),
      Arc::new(self.source.clone()),
      cancel.clone(),
    )
    .expect("spawn coordinator");
    (handle, cancel)
  }
}

/// Wait for the index to settle, failing the test after 10 seconds.
pub async fn ready(handle: &IndexHandle) -> IndexState {
  tokio::time::timeout(Duration::from_secs(10), handle.wait_until_ready())
    .await
    .expect("index should become ready in time")
    .expect("coordinator alive")
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(5);

  while start.elapsed() < timeout {
    if check() {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  false
}

/// The `content` frontmatter value committed for a probe document.
pub fn committed_text(handle: &IndexHandle, path: &str) -> Option<String> {
  let result = handle.query(path);
  let metadata = result.record()?.metadata.as_ref()?;
  metadata.frontmatter.get("content")?.as_str().map(str::to_string)
}
