// src/runtime/gate.rs

use std::sync::Arc;
use tokio::sync::watch;

/// A cooperative pause switch shared between an execution handle and the
/// worker it controls.
///
/// The worker side awaits [`PauseGate::wait_open`] at its safe points (before
/// the entry starts, before each delivered frame); the controlling side flips
/// the switch with `pause`/`resume`.
#[derive(Debug, Clone)]
pub struct PauseGate {
  paused: Arc<watch::Sender<bool>>,
}

impl PauseGate {
  pub fn new(paused: bool) -> Self {
    let (tx, _) = watch::channel(paused);
    Self { paused: Arc::new(tx) }
  }

  /// Closes the gate. Returns `true` if it was open.
  pub fn pause(&self) -> bool {
    !self.paused.send_replace(true)
  }

  /// Opens the gate. Returns `true` if it was closed.
  pub fn resume(&self) -> bool {
    self.paused.send_replace(false)
  }

  pub fn is_paused(&self) -> bool {
    *self.paused.borrow()
  }

  /// Returns immediately when open, otherwise waits for `resume`.
  pub async fn wait_open(&self) {
    let mut rx = self.paused.subscribe();
    // The sender lives in `self`, so this cannot observe a closed channel.
    let _ = rx.wait_for(|paused| !*paused).await;
  }
}

impl Default for PauseGate {
  fn default() -> Self {
    Self::new(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tokio::time::timeout;

  #[tokio::test]
  async fn open_gate_does_not_block() {
    let gate = PauseGate::default();
    assert!(timeout(Duration::from_millis(50), gate.wait_open()).await.is_ok());
  }

  #[tokio::test]
  async fn paused_gate_blocks_until_resumed() {
    let gate = PauseGate::new(true);
    let waiter = {
      let gate = gate.clone();
      tokio::spawn(async move { gate.wait_open().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    assert!(gate.resume());
    assert!(!gate.resume(), "already open");
    timeout(Duration::from_millis(200), waiter)
      .await
      .expect("waiter should be released")
      .unwrap();
  }

  #[test]
  fn pause_reports_transitions() {
    let gate = PauseGate::default();
    assert!(gate.pause());
    assert!(!gate.pause());
    assert!(gate.is_paused());
  }
}
