//! Indexing E2E tests.
//!
//! Tests documents flowing from change notification through the worker pool
//! into the committed index.

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{IndexTestContext, committed_text, probe, ready},
      status::IndexPhase,
    },
    document::DocumentStatus,
    store::QueryResult,
  };

  /// Test: a markdown document is parsed and its heading becomes a section.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_markdown_document_is_indexed() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("A.md", "# Title").await.expect("send");
    let state = ready(&handle).await;

    let result = handle.query("A.md");
    let record = result.record().expect("A.md should be indexed");
    assert_eq!(record.generation, 1);
    assert_eq!(record.status, DocumentStatus::Indexed);
    assert!(record.last_parsed.is_some());
    assert!(record.fingerprint.is_some());

    let metadata = record.metadata.as_ref().expect("metadata");
    assert_eq!(metadata.sections.len(), 1);
    assert_eq!(metadata.sections[0].title, "Title");

    assert_eq!(state.indexed, 1);
    assert_eq!(state.failed, 0);
    assert_eq!(state.phase, IndexPhase::Ready);

    cancel.cancel();
  }

  /// Test: a canvas document is unsupported, hidden from queries, not a failure.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_canvas_document_is_unsupported() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("B.canvas", r#"{"nodes":[]}"#).await.expect("send");
    let state = ready(&handle).await;

    assert_eq!(handle.query("B.canvas"), QueryResult::NotIndexed);
    let record = handle.store().record("B.canvas").expect("record exists");
    assert_eq!(record.status, DocumentStatus::Unsupported);
    assert_eq!(record.format, "canvas");

    assert_eq!(state.failed, 0);
    assert_eq!(state.unsupported, 1);
    assert_eq!(state.total, 1);
    assert!(handle.store().paths().is_empty());

    cancel.cancel();
  }

  /// Test: two workers, five documents - never more than two parsing at once,
  /// every document reaches a terminal outcome.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_pool_bounds_concurrency() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    for i in 0..4 {
      handle
        .document_changed(format!("doc-{i}.probe"), probe(40, &format!("doc {i}")))
        .await
        .expect("send");
    }
    handle.document_changed("doc-4.canvas", "{}").await.expect("send");

    let state = ready(&handle).await;

    assert!(ctx.probe.max_concurrent() <= 2, "max concurrent was {}", ctx.probe.max_concurrent());
    assert_eq!(ctx.probe.duplicates(), 0);
    assert_eq!(state.total, 5);
    assert_eq!(state.indexed + state.failed + state.unsupported, 5);
    assert_eq!(state.indexed, 4);
    assert_eq!(state.unsupported, 1);

    for i in 0..4 {
      assert_eq!(committed_text(&handle, &format!("doc-{i}.probe")), Some(format!("doc {i}")));
    }

    cancel.cancel();
  }

  /// Test: initialize loads every document from the source and reaches Ready.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_initialize_from_source() {
    let ctx = IndexTestContext::new(2);
    ctx.source.insert("notes/a.md", "---\ntags: [alpha]\n---\n# A\nSee [[b]].");
    ctx.source.insert("notes/b.md", "# B\n#beta");
    ctx.source.insert("board.canvas", "{}");
    ctx.source.insert("slow.probe", probe(20, "slow"));

    let (handle, cancel) = ctx.spawn();
    assert_eq!(handle.status().snapshot().phase, IndexPhase::Initializing);

    handle.initialize(ctx.source.paths()).await.expect("initialize");
    let state = ready(&handle).await;

    assert_eq!(state.total, 4);
    assert_eq!(state.pending, 0);
    assert_eq!(state.in_flight, 0);
    assert_eq!(state.indexed, 3);
    assert_eq!(state.unsupported, 1);

    let a = handle.store().record("notes/a.md").expect("a");
    assert_eq!(a.generation, 0);
    assert_eq!(handle.store().tagged("alpha"), vec!["notes/a.md"]);
    assert_eq!(handle.store().tagged("#beta"), vec!["notes/b.md"]);
    assert_eq!(handle.store().linking_to("b.md"), vec!["notes/a.md"]);
    assert_eq!(committed_text(&handle, "slow.probe"), Some("slow".to_string()));

    cancel.cancel();
  }

  /// Test: a path the source cannot load is counted as failed.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_initialize_with_missing_document() {
    let ctx = IndexTestContext::new(1);
    ctx.source.insert("present.md", "# Here");

    let (handle, cancel) = ctx.spawn();
    handle
      .initialize(vec!["present.md".to_string(), "missing.md".to_string()])
      .await
      .expect("initialize");
    let state = ready(&handle).await;

    assert_eq!(state.total, 2);
    assert_eq!(state.indexed, 1);
    assert_eq!(state.failed, 1);
    let missing = handle.store().record("missing.md").expect("record seeded");
    assert!(missing.is_failed());
    assert_eq!(handle.query("missing.md"), QueryResult::NotIndexed);

    cancel.cancel();
  }

  /// Test: a parse failure keeps last-known-good metadata; a later good
  /// version clears the failure.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_failure_keeps_last_known_good() {
    let ctx = IndexTestContext::new(1);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("n.probe", probe(0, "good")).await.expect("send");
    ready(&handle).await;
    assert_eq!(committed_text(&handle, "n.probe"), Some("good".to_string()));

    handle.document_changed("n.probe", "fail").await.expect("send");
    let state = ready(&handle).await;
    assert_eq!(state.failed, 1);
    assert_eq!(state.indexed, 0);

    let record = handle.store().record("n.probe").expect("record");
    assert_eq!(record.generation, 2);
    match &record.status {
      DocumentStatus::Failed { message } => assert!(message.contains("probe asked to fail")),
      other => panic!("expected failure, got {other:?}"),
    }
    // Still answers with the previous metadata.
    assert_eq!(committed_text(&handle, "n.probe"), Some("good".to_string()));

    handle.document_changed("n.probe", probe(0, "fixed")).await.expect("send");
    let state = ready(&handle).await;
    assert_eq!(state.failed, 0);
    assert_eq!(state.indexed, 1);
    assert_eq!(committed_text(&handle, "n.probe"), Some("fixed".to_string()));

    cancel.cancel();
  }

  /// Test: malformed markdown frontmatter is a failure for that document only.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_bad_frontmatter_is_isolated() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    handle
      .document_changed("bad.md", "---\njust some words\n---\n# Body")
      .await
      .expect("send");
    handle.document_changed("good.md", "# Fine").await.expect("send");
    let state = ready(&handle).await;

    assert_eq!(state.failed, 1);
    assert_eq!(state.indexed, 1);
    assert_eq!(state.phase, IndexPhase::Ready);
    assert!(handle.query("good.md").is_indexed());
    assert_eq!(handle.query("bad.md"), QueryResult::NotIndexed);

    cancel.cancel();
  }

  /// Test: a parser panic is contained and the same single worker keeps going.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_parser_panic_is_contained() {
    let ctx = IndexTestContext::new(1);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("p.probe", "panic").await.expect("send");
    handle.document_changed("q.probe", probe(0, "after")).await.expect("send");
    let state = ready(&handle).await;

    assert_eq!(state.failed, 1);
    assert_eq!(committed_text(&handle, "q.probe"), Some("after".to_string()));

    let workers = handle.workers().await.expect("workers");
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].epoch, 0, "worker was not replaced");
    assert_eq!(workers[0].jobs_completed, 2);

    cancel.cancel();
  }

  /// Test: inline fields follow the coordinator's configuration.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_inline_fields_can_be_disabled() {
    let mut ctx = IndexTestContext::new(1);
    ctx.config.index_inline_fields = false;
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("f.md", "# F\nstatus:: done").await.expect("send");
    ready(&handle).await;

    let result = handle.query("f.md");
    let metadata = result.record().and_then(|r| r.metadata.as_ref()).expect("metadata");
    assert!(metadata.inline_fields.is_empty());

    cancel.cancel();
  }
}
