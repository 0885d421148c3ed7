//! Supersession E2E tests.
//!
//! Tests that only the latest queued version of a document is ever committed,
//! whatever order jobs finish in, and that deletions are never undone by
//! late results.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use crate::{
    actor::__tests__::helpers::{IndexTestContext, committed_text, probe, ready, wait_for},
    store::QueryResult,
  };

  /// Test: generation 2 arrives while generation 1 is parsing; generation 1's
  /// result is discarded and only generation 2's content is committed.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_newer_generation_wins() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("A.probe", probe(150, "first")).await.expect("send");
    assert!(
      wait_for(Duration::from_secs(5), || ctx.probe.is_active("A.probe")).await,
      "generation 1 should start parsing"
    );
    handle.document_changed("A.probe", probe(0, "second")).await.expect("send");

    let state = ready(&handle).await;

    let record = handle.store().record("A.probe").expect("record");
    assert_eq!(record.generation, 2);
    assert_eq!(committed_text(&handle, "A.probe"), Some("second".to_string()));
    assert!(state.discarded >= 1, "generation 1 result should be discarded");
    assert_eq!(ctx.probe.duplicates(), 0, "a path must never be parsed twice at once");

    cancel.cancel();
  }

  /// Test: a burst of changes to one path commits only the last one.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_burst_of_changes_commits_last() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    for i in 1..=10 {
      handle
        .document_changed("burst.probe", probe(20, &format!("v{i}")))
        .await
        .expect("send");
    }
    let state = ready(&handle).await;

    let record = handle.store().record("burst.probe").expect("record");
    assert_eq!(record.generation, 10);
    assert_eq!(committed_text(&handle, "burst.probe"), Some("v10".to_string()));
    assert_eq!(state.total, 1);
    assert_eq!(state.indexed, 1);

    // Queued versions were replaced in place, so far fewer than ten parses ran.
    let parses = ctx.probe.parsed().iter().filter(|(p, _)| p == "burst.probe").count();
    assert!(parses < 10, "expected queued versions to be superseded, saw {parses} parses");
    assert_eq!(ctx.probe.duplicates(), 0);

    cancel.cancel();
  }

  /// Test: deleting a document mid-parse removes it for good.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_delete_during_parse_is_not_resurrected() {
    let ctx = IndexTestContext::new(1);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("gone.probe", probe(100, "ghost")).await.expect("send");
    assert!(wait_for(Duration::from_secs(5), || ctx.probe.is_active("gone.probe")).await);
    handle.document_deleted("gone.probe").await.expect("send");

    let state = ready(&handle).await;
    assert!(ctx.probe.was_parsed("gone.probe"), "in-flight parse runs to completion");
    assert_eq!(handle.query("gone.probe"), QueryResult::NotIndexed);
    assert!(handle.store().record("gone.probe").is_none());
    assert_eq!(state.total, 0);
    assert_eq!(state.discarded, 1);

    cancel.cancel();
  }

  /// Test: a document deleted and recreated while its old version is still
  /// parsing never receives the old version's result.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_recreate_during_parse_discards_old_result() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("A.probe", probe(150, "ghost")).await.expect("send");
    assert!(wait_for(Duration::from_secs(5), || ctx.probe.is_active("A.probe")).await);
    handle.document_deleted("A.probe").await.expect("send");
    handle.document_changed("A.probe", "fail").await.expect("send");

    let state = ready(&handle).await;
    assert!(ctx.probe.was_parsed("A.probe"), "old version finished parsing");

    let record = handle.store().record("A.probe").expect("record");
    assert_eq!(record.generation, 2);
    assert!(record.is_failed());
    assert!(record.metadata.is_none(), "deleted content must not become last-known-good");
    assert_eq!(handle.query("A.probe"), QueryResult::NotIndexed);
    assert_eq!(committed_text(&handle, "A.probe"), None);
    assert_eq!(state.discarded, 1);
    assert_eq!(state.failed, 1);

    cancel.cancel();
  }

  /// Test: deleting a queued document cancels its job.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_delete_cancels_queued_job() {
    let ctx = IndexTestContext::new(1);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("busy.probe", probe(100, "busy")).await.expect("send");
    assert!(wait_for(Duration::from_secs(5), || ctx.probe.is_active("busy.probe")).await);
    handle.document_changed("queued.probe", probe(0, "queued")).await.expect("send");
    handle.document_deleted("queued.probe").await.expect("send");

    let state = ready(&handle).await;
    assert!(!ctx.probe.was_parsed("queued.probe"));
    assert!(handle.store().record("queued.probe").is_none());
    assert_eq!(committed_text(&handle, "busy.probe"), Some("busy".to_string()));
    assert_eq!(state.total, 1);

    cancel.cancel();
  }

  /// Test: a document recreated after deletion starts a fresh record.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_recreate_after_delete() {
    let ctx = IndexTestContext::new(1);
    let (handle, cancel) = ctx.spawn();

    handle.document_changed("r.md", "# One").await.expect("send");
    ready(&handle).await;
    handle.document_deleted("r.md").await.expect("send");
    handle.document_changed("r.md", "# Two").await.expect("send");
    ready(&handle).await;

    let result = handle.query("r.md");
    let record = result.record().expect("indexed");
    assert_eq!(record.generation, 1);
    assert_eq!(record.metadata.as_ref().expect("metadata").sections[0].title, "Two");

    cancel.cancel();
  }

  /// Test: re-initializing while documents are parsing supersedes those jobs.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_reinitialize_bumps_generations() {
    let ctx = IndexTestContext::new(1);
    ctx.source.insert("x.probe", probe(50, "from source"));

    let (handle, cancel) = ctx.spawn();
    handle.document_changed("x.probe", probe(100, "from change")).await.expect("send");
    assert!(wait_for(Duration::from_secs(5), || ctx.probe.is_active("x.probe")).await);
    handle.initialize(vec!["x.probe".to_string()]).await.expect("initialize");

    let state = ready(&handle).await;
    let record = handle.store().record("x.probe").expect("record");
    assert_eq!(record.generation, 2);
    assert_eq!(committed_text(&handle, "x.probe"), Some("from source".to_string()));
    assert_eq!(state.discarded, 1);

    cancel.cancel();
  }
}
