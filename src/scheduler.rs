//! Periodic background resync with backoff.

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::config::SyncConfig;
use crate::guide::FieldGuide;
use crate::remote::RemoteSource;
use crate::sync::SyncReport;

/// Runs resync passes on a jittered, exponentially backed-off interval.
///
/// At most one pass runs at a time; a pass requested while another is running is skipped.
#[derive(Debug)]
pub struct ResyncScheduler {
  interval: Duration,
  max_interval: Duration,
  jitter: f64,
  running: AtomicBool,
  failures: AtomicU32,
}

/// Clears the running flag when a pass ends, however it ends.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl ResyncScheduler {
  pub fn new(interval: Duration, max_interval: Duration, jitter: f64) -> Self {
    Self {
      interval,
      max_interval: max_interval.max(interval),
      jitter: jitter.clamp(0.0, 1.0),
      running: AtomicBool::new(false),
      failures: AtomicU32::new(0),
    }
  }

  pub fn from_config(config: &SyncConfig) -> Self {
    Self::new(config.interval(), config.max_interval(), config.jitter)
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Consecutive passes that had at least one failed resource.
  pub fn consecutive_failures(&self) -> u32 {
    self.failures.load(Ordering::Relaxed)
  }

  /// Delay before the next pass, before jitter: `interval * 2^failures`, capped.
  pub fn base_delay(&self, failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures);
    self.interval.saturating_mul(factor).min(self.max_interval)
  }

  /// Delay before the next pass with jitter applied.
  pub fn next_delay(&self) -> Duration {
    let base = self.base_delay(self.consecutive_failures());
    if self.jitter == 0.0 {
      return base;
    }
    let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
    base.mul_f64(1.0 + spread)
  }

  /// Run one pass unless one is already running (returns `None` then).
  pub async fn run_pass<R, S>(&self, guide: &FieldGuide<R, S>) -> Option<SyncReport>
  where
    R: RemoteSource + 'static,
    S: CacheStorage + 'static,
  {
    if self.running.swap(true, Ordering::AcqRel) {
      debug!("Resync already running, skipping");
      return None;
    }
    let _flag = RunningFlag(&self.running);

    let report = guide
      .resync_all(|message| debug!("{}", message))
      .await;

    if report.is_clean() {
      self.failures.store(0, Ordering::Relaxed);
    } else {
      self.failures.fetch_add(1, Ordering::Relaxed);
    }
    Some(report)
  }

  /// Run passes until `shutdown` resolves.
  pub async fn run_until<R, S, F>(&self, guide: &FieldGuide<R, S>, shutdown: F)
  where
    R: RemoteSource + 'static,
    S: CacheStorage + 'static,
    F: Future<Output = ()>,
  {
    tokio::pin!(shutdown);

    loop {
      if let Some(report) = self.run_pass(guide).await {
        info!(
          failed = report.failed(),
          updated = report.updated(),
          "Background resync finished"
        );
      }

      let delay = self.next_delay();
      debug!(?delay, "Next resync scheduled");
      tokio::select! {
        _ = &mut shutdown => break,
        _ = tokio::time::sleep(delay) => {}
      }
    }
  }
}
