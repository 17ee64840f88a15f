// src/runtime/waitgroup.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts live execution contexts so a registry can wait for all of them to
/// finish during termination.
///
/// Each supervised task holds a [`WaitGuard`]; the count drops when the guard
/// drops, whether the task returned normally or was cancelled.
#[derive(Debug, Clone)]
pub(crate) struct WaitGroup {
  count: Arc<AtomicUsize>,
  notify_on_zero: Arc<Notify>,
}

impl WaitGroup {
  pub fn new() -> Self {
    Self {
      count: Arc::new(AtomicUsize::new(0)),
      notify_on_zero: Arc::new(Notify::new()),
    }
  }

  /// Registers one more live member and returns its guard.
  pub fn enter(&self) -> WaitGuard {
    let prev = self.count.fetch_add(1, Ordering::AcqRel);
    tracing::trace!(count = prev + 1, "WaitGroup member entered");
    WaitGuard { group: self.clone() }
  }

  fn leave(&self) {
    let prev = self.count.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(prev > 0, "WaitGroup count underflow");
    if prev == 1 {
      tracing::trace!("WaitGroup count reached zero, notifying waiters");
      self.notify_on_zero.notify_waiters();
    }
  }

  /// Waits until no members are live. Returns immediately when already zero.
  pub async fn wait(&self) {
    loop {
      // Register interest before checking, otherwise a `leave` landing in
      // between would be missed.
      let notified = self.notify_on_zero.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      if self.count.load(Ordering::Acquire) == 0 {
        return;
      }
      notified.await;
    }
  }

  pub fn count(&self) -> usize {
    self.count.load(Ordering::Acquire)
  }
}

/// Membership token of a [`WaitGroup`].
#[derive(Debug)]
pub(crate) struct WaitGuard {
  group: WaitGroup,
}

impl Drop for WaitGuard {
  fn drop(&mut self) {
    self.group.leave();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tokio::time::timeout;

  #[tokio::test]
  async fn wait_returns_once_all_guards_drop() {
    let wg = WaitGroup::new();
    let first = wg.enter();
    let second = wg.enter();
    assert_eq!(wg.count(), 2);

    let mut waiter = {
      let wg = wg.clone();
      tokio::spawn(async move { wg.wait().await })
    };

    drop(first);
    assert!(
      timeout(Duration::from_millis(20), &mut waiter).await.is_err(),
      "one member still live"
    );

    drop(second);
    assert!(timeout(Duration::from_millis(200), waiter).await.is_ok());
    assert_eq!(wg.count(), 0);
  }

  #[tokio::test]
  async fn wait_on_empty_group_is_immediate() {
    let wg = WaitGroup::new();
    assert!(timeout(Duration::from_millis(10), wg.wait()).await.is_ok());
  }

  #[tokio::test]
  async fn guard_is_released_when_task_is_aborted() {
    let wg = WaitGroup::new();
    let guard = wg.enter();
    let task = tokio::spawn(async move {
      let _guard = guard;
      std::future::pending::<()>().await;
    });
    task.abort();
    let _ = task.await;
    assert!(timeout(Duration::from_millis(200), wg.wait()).await.is_ok());
  }
}
