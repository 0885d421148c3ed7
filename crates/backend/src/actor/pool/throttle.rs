//! Duty-cycle accounting for import workers.
//!
//! Each worker keeps its own [`DutyCycle`]. After finishing a job it asks how
//! long it must stay idle so that, over the trailing window, the fraction of
//! time spent parsing does not exceed the configured utilization. The pool
//! does not hand the worker another job until that pause has elapsed.

use std::{
  collections::VecDeque,
  time::{Duration, Instant},
};

const MAX_ITERATIONS: usize = 32;
const EPSILON_SECS: f64 = 1e-9;

/// Busy-time tracker over a trailing window
#[derive(Debug, Clone)]
pub struct DutyCycle {
  utilization: f64,
  window: Duration,
  first_start: Option<Instant>,
  samples: VecDeque<(Instant, Instant)>,
}

impl DutyCycle {
  pub fn new(utilization: f64, window: Duration) -> Self {
    Self {
      utilization: utilization.clamp(f64::MIN_POSITIVE, 1.0),
      window,
      first_start: None,
      samples: VecDeque::new(),
    }
  }

  pub fn utilization(&self) -> f64 {
    self.utilization
  }

  pub fn set_utilization(&mut self, utilization: f64) {
    self.utilization = utilization.clamp(f64::MIN_POSITIVE, 1.0);
  }

  /// Busy time overlapping `[now - window, now]`.
  pub fn busy_in_window(&self, now: Instant) -> Duration {
    let window_start = now.checked_sub(self.window);
    self
      .samples
      .iter()
      .map(|&(start, end)| {
        let start = match window_start {
          Some(ws) => start.max(ws),
          None => start,
        };
        end.min(now).saturating_duration_since(start)
      })
      .sum()
  }

  /// Fraction of the trailing window spent busy, as observed at `now`.
  pub fn busy_ratio(&self, now: Instant) -> f64 {
    let Some(first) = self.first_start else {
      return 0.0;
    };
    let span = now.saturating_duration_since(first).min(self.window);
    if span.is_zero() {
      return 0.0;
    }
    self.busy_in_window(now).as_secs_f64() / span.as_secs_f64()
  }

  /// Record a job that ran from `start` to `end` and return the pause the
  /// worker must take before its next job.
  pub fn record(&mut self, start: Instant, end: Instant) -> Duration {
    let first = *self.first_start.get_or_insert(start);
    self.samples.push_back((start, end));
    self.prune(end);

    if self.utilization >= 1.0 {
      return Duration::ZERO;
    }

    let mut resume = end;
    for _ in 0..MAX_ITERATIONS {
      let busy = self.busy_in_window(resume).as_secs_f64();
      let span = resume.saturating_duration_since(first).min(self.window).as_secs_f64();
      let required = busy / self.utilization;
      if required <= span + EPSILON_SECS {
        return (resume - end).min(self.window);
      }
      // Steps past the window can never be needed and may not fit a Duration.
      let step = Duration::try_from_secs_f64(required - span).map_or(self.window, |step| step.min(self.window));
      resume += step;
    }

    // A full window of idleness always satisfies the bound.
    self.window
  }

  fn prune(&mut self, now: Instant) {
    let Some(cutoff) = now.checked_sub(self.window) else {
      return;
    };
    while self.samples.front().is_some_and(|&(_, end)| end <= cutoff) {
      self.samples.pop_front();
    }
  }
}
