// src/runtime/control.rs

use super::{KillPriority, PauseGate, StopSignal};

/// The pause gate and stop signal of one execution context, shared between
/// the handle that controls it and the tasks running inside it.
#[derive(Debug, Clone, Default)]
pub struct ExecutionControl {
  pub(crate) gate: PauseGate,
  pub(crate) stop: StopSignal,
}

impl ExecutionControl {
  /// `paused` closes the gate before anything runs.
  pub fn new(paused: bool) -> Self {
    Self {
      gate: PauseGate::new(paused),
      stop: StopSignal::new(),
    }
  }

  /// A control sharing this gate whose stop signal is a child of this one.
  pub fn child(&self) -> Self {
    Self {
      gate: self.gate.clone(),
      stop: self.stop.child(),
    }
  }

  pub fn pause(&self) -> bool {
    self.gate.pause()
  }

  pub fn resume(&self) -> bool {
    self.gate.resume()
  }

  pub fn is_paused(&self) -> bool {
    self.gate.is_paused()
  }

  pub fn stop(&self, priority: KillPriority) {
    self.stop.stop(priority)
  }

  pub fn is_stopped(&self) -> bool {
    self.stop.is_stopped()
  }

  pub async fn stopped(&self) {
    self.stop.stopped().await
  }
}
