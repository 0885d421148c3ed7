//! Lifecycle E2E tests.
//!
//! Tests pool configuration, worker fault recovery, and coordinator shutdown.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use crate::{
    actor::{
      __tests__::helpers::{IndexTestContext, committed_text, probe, probe_once, ready, wait_for},
      coordinator::IndexError,
      handle::SendError,
      pool::WorkerActivity,
      status::IndexPhase,
    },
    config::ConfigError,
  };

  // ==========================================================================
  // Configuration
  // ==========================================================================

  /// Test: invalid pool settings are rejected and leave the pool unchanged.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_configure_validates() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    let err = handle.configure(0, 0.5).await.unwrap_err();
    assert!(matches!(err, IndexError::Config(ConfigError::InvalidThreadCount(0))));

    let err = handle.configure(2, 1.5).await.unwrap_err();
    assert!(matches!(err, IndexError::Config(ConfigError::InvalidUtilization(_))));

    let err = handle.configure(2, 0.0).await.unwrap_err();
    assert!(matches!(err, IndexError::Config(ConfigError::InvalidUtilization(_))));

    assert_eq!(handle.workers().await.expect("workers").len(), 2);

    cancel.cancel();
  }

  /// Test: configure resizes the pool and work still completes afterwards.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_configure_resizes_pool() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();

    handle.configure(4, 0.5).await.expect("grow");
    assert_eq!(handle.workers().await.expect("workers").len(), 4);

    handle.configure(1, 0.9).await.expect("shrink");
    let workers = handle.workers().await.expect("workers");
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].slot, 0);

    for i in 0..3 {
      handle
        .document_changed(format!("{i}.probe"), probe(5, "x"))
        .await
        .expect("send");
    }
    let state = ready(&handle).await;
    assert_eq!(state.indexed, 3);
    assert_eq!(ctx.probe.max_concurrent(), 1);

    cancel.cancel();
  }

  // ==========================================================================
  // Worker faults
  // ==========================================================================

  /// Test: a worker stuck past the job timeout is replaced and its job is
  /// redispatched to the replacement.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_timed_out_job_is_redispatched() {
    let ctx = IndexTestContext::new(1).with_job_timeout(Duration::from_millis(100));
    let (handle, cancel) = ctx.spawn();

    handle
      .document_changed("stuck.probe", probe_once(400, "eventually"))
      .await
      .expect("send");
    let state = ready(&handle).await;

    assert_eq!(committed_text(&handle, "stuck.probe"), Some("eventually".to_string()));
    assert_eq!(ctx.probe.attempts("stuck.probe"), 2);
    assert_eq!(state.failed, 0);

    let workers = handle.workers().await.expect("workers");
    assert_eq!(workers.len(), 1, "pool size is preserved across restarts");
    assert_ne!(workers[0].epoch, 0, "the stuck worker was replaced");
    assert_eq!(workers[0].activity, WorkerActivity::Idle);

    cancel.cancel();
  }

  /// Test: a timed-out job that was superseded while it ran is dropped, and
  /// the late result from the abandoned thread never lands.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_timed_out_job_superseded_before_redispatch() {
    let ctx = IndexTestContext::new(1).with_job_timeout(Duration::from_millis(100));
    let (handle, cancel) = ctx.spawn();

    handle
      .document_changed("s.probe", probe(300, "old"))
      .await
      .expect("send");
    assert!(wait_for(Duration::from_secs(5), || ctx.probe.is_active("s.probe")).await);
    handle.document_changed("s.probe", probe(0, "new")).await.expect("send");

    ready(&handle).await;
    assert_eq!(committed_text(&handle, "s.probe"), Some("new".to_string()));

    // Let the abandoned thread finish; its output must be ignored.
    let abandoned_finished = || ctx.probe.parsed().iter().any(|(p, t)| p == "s.probe" && t == "old");
    assert!(wait_for(Duration::from_secs(5), abandoned_finished).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(committed_text(&handle, "s.probe"), Some("new".to_string()));
    assert_eq!(ctx.probe.attempts("s.probe"), 2, "superseded job was not redispatched");
    assert_eq!(handle.workers().await.expect("workers").len(), 1);

    cancel.cancel();
  }

  // ==========================================================================
  // Shutdown
  // ==========================================================================

  /// Test: shutdown drains in-flight work and the handle stops working.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_shutdown_via_handle() {
    let ctx = IndexTestContext::new(1);
    let (handle, _cancel) = ctx.spawn();

    handle.document_changed("last.probe", probe(50, "drained")).await.expect("send");
    assert!(wait_for(Duration::from_secs(5), || ctx.probe.is_active("last.probe")).await);

    handle.shutdown().await.expect("shutdown");
    assert_eq!(committed_text(&handle, "last.probe"), Some("drained".to_string()));

    assert!(matches!(handle.workers().await, Err(SendError::ActorGone)));
    assert!(handle.configure(1, 1.0).await.is_err());
    // Reads keep answering from the committed store.
    assert!(handle.query("last.probe").is_indexed());
  }

  /// Test: cancelling the token stops the coordinator.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_cancellation_stops_coordinator() {
    let ctx = IndexTestContext::new(2);
    let (handle, cancel) = ctx.spawn();
    let mut status = handle.status();

    handle.document_changed("a.md", "# A").await.expect("send");
    ready(&handle).await;

    cancel.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
      while status.changed().await.is_ok() {}
    })
    .await;
    assert!(stopped.is_ok(), "status channel should close after cancellation");
    assert!(matches!(handle.workers().await, Err(SendError::ActorGone)));
  }

  /// Test: the phase starts at Initializing and an empty initialize is Ready.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_empty_initialize_is_ready() {
    let ctx = IndexTestContext::new(1);
    let (handle, cancel) = ctx.spawn();
    assert_eq!(handle.status().snapshot().phase, IndexPhase::Initializing);

    handle.initialize(Vec::new()).await.expect("initialize");
    let state = ready(&handle).await;
    assert_eq!(state.total, 0);
    assert_eq!(state.to_string(), "Index ready: 0 documents");

    cancel.cancel();
  }
}
