// src/worker/events.rs

/// Lifecycle notifications published by a worker's execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive] // Allow adding more events later
pub enum WorkerEvent {
  /// The execution context was spawned. The entry may still be held by the pause gate.
  Started { worker: String },
  /// The parent side received the worker's handshake.
  Initialized { worker: String },
  /// The entry panicked. `fatal` tells whether the context was stopped because of it.
  Failed { worker: String, error_msg: String, fatal: bool },
  /// The execution context has terminated.
  Exited { worker: String },
}

impl WorkerEvent {
  pub fn worker(&self) -> &str {
    match self {
      WorkerEvent::Started { worker }
      | WorkerEvent::Initialized { worker }
      | WorkerEvent::Failed { worker, .. }
      | WorkerEvent::Exited { worker } => worker,
    }
  }
}

// Type alias for the channel sender used for monitor events
pub type MonitorSender = async_channel::Sender<WorkerEvent>;
// Type alias for the channel receiver used for monitor events
pub type MonitorReceiver = async_channel::Receiver<WorkerEvent>;

// Default capacity for monitor channel
pub const DEFAULT_MONITOR_CAPACITY: usize = 100;

/// Creates a monitor channel with the default capacity.
pub fn monitor() -> (MonitorSender, MonitorReceiver) {
  async_channel::bounded(DEFAULT_MONITOR_CAPACITY)
}

/// Best-effort publish. A full or closed monitor never blocks the worker.
pub(crate) fn publish(monitor: Option<&MonitorSender>, event: WorkerEvent) {
  if let Some(tx) = monitor {
    if let Err(e) = tx.try_send(event) {
      tracing::trace!(event = ?e.into_inner(), "Monitor did not accept event");
    }
  }
}
