// src/runtime/stop.rs

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a termination request treats work that is already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KillPriority {
  /// Stop at once. Frames still queued in the worker's mailbox are dropped.
  #[default]
  Immediate,
  /// Let frames already queued be delivered, then stop.
  BeforeNextEvent,
}

const UNSET: u8 = 0;
const IMMEDIATE: u8 = 1;
const BEFORE_NEXT_EVENT: u8 = 2;

/// Termination signal shared by an execution context and the tasks it owns.
///
/// Children created with [`StopSignal::child`] stop when the parent stops,
/// but stopping a child leaves the parent running. Each signal remembers the
/// priority it was stopped with; a child stopped through its parent reports
/// the parent's.
#[derive(Debug, Clone)]
pub struct StopSignal {
  token: CancellationToken,
  priority: Arc<AtomicU8>,
  parent: Option<Box<StopSignal>>,
}

impl StopSignal {
  pub fn new() -> Self {
    Self {
      token: CancellationToken::new(),
      priority: Arc::new(AtomicU8::new(UNSET)),
      parent: None,
    }
  }

  pub fn child(&self) -> Self {
    Self {
      token: self.token.child_token(),
      priority: Arc::new(AtomicU8::new(UNSET)),
      parent: Some(Box::new(self.clone())),
    }
  }

  /// Fires the signal. Only the first call decides the priority.
  pub fn stop(&self, priority: KillPriority) {
    if self.token.is_cancelled() {
      return;
    }
    let code = match priority {
      KillPriority::Immediate => IMMEDIATE,
      KillPriority::BeforeNextEvent => BEFORE_NEXT_EVENT,
    };
    let _ = self
      .priority
      .compare_exchange(UNSET, code, Ordering::AcqRel, Ordering::Acquire);
    self.token.cancel();
  }

  pub fn is_stopped(&self) -> bool {
    self.token.is_cancelled()
  }

  /// The priority this signal was stopped with, if it has been stopped.
  pub fn priority(&self) -> Option<KillPriority> {
    match self.priority.load(Ordering::Acquire) {
      IMMEDIATE => Some(KillPriority::Immediate),
      BEFORE_NEXT_EVENT => Some(KillPriority::BeforeNextEvent),
      _ => self.parent.as_ref().and_then(|parent| parent.priority()),
    }
  }

  /// Whether queued work should be drained before the owner exits.
  pub fn drains(&self) -> bool {
    self.priority() == Some(KillPriority::BeforeNextEvent)
  }

  pub async fn stopped(&self) {
    self.token.cancelled().await
  }
}

impl Default for StopSignal {
  fn default() -> Self {
    Self::new()
  }
}
