// src/worker/platform.rs

//! The spawn primitive workers are built on.
//!
//! An execution context is a supervised tokio task. It runs the entry
//! function once, holds it behind a pause gate until resumed, and stays
//! alive after the entry returns (its delivery loops keep running) until it
//! is killed or the entry panics with `errors_are_fatal` set.

use crate::error::WorkerError;
use crate::runtime::{ExecutionControl, KillPriority, WaitGuard};
use crate::worker::events::{publish, MonitorSender, WorkerEvent};

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Runs once, right before the `Exited` event is published.
pub(crate) type ExitHook = Box<dyn FnOnce() + Send + 'static>;

/// Options handed to the platform when spawning. Not interpreted by the
/// messenger or registry.
#[derive(Debug, Clone)]
pub struct PlatformOptions {
  /// Start suspended: the entry does not run until `resume`.
  pub paused: bool,
  /// Stop the execution context when the entry panics.
  pub errors_are_fatal: bool,
  /// Receives `Started`, `Initialized`, `Failed` and `Exited` events.
  pub monitor: Option<MonitorSender>,
  /// Diagnostic label for the tracing span. Defaults to the worker name.
  pub debug_name: Option<String>,
}

impl Default for PlatformOptions {
  fn default() -> Self {
    Self {
      paused: false,
      errors_are_fatal: true,
      monitor: None,
      debug_name: None,
    }
  }
}

/// Controls one spawned execution context.
pub struct ExecutionHandle {
  label: String,
  control: ExecutionControl,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionHandle {
  pub fn label(&self) -> &str {
    &self.label
  }

  /// Suspends the context at its next safe point. No-op if already paused.
  pub fn pause(&self) {
    if self.control.pause() {
      tracing::debug!(worker = %self.label, "Execution paused");
    }
  }

  pub fn resume(&self) {
    if self.control.resume() {
      tracing::debug!(worker = %self.label, "Execution resumed");
    }
  }

  pub fn is_paused(&self) -> bool {
    self.control.is_paused()
  }

  /// Requests termination. Repeated calls keep the first priority.
  pub fn kill(&self, priority: KillPriority) {
    if !self.control.is_stopped() {
      tracing::debug!(worker = %self.label, ?priority, "Execution kill requested");
    }
    self.control.stop(priority);
  }

  /// True once the supervising task has finished.
  pub fn is_terminated(&self) -> bool {
    self.task.lock().as_ref().map_or(true, |task| task.is_finished())
  }

  /// Waits for the supervising task to finish. Only the first caller waits.
  pub async fn join(&self) -> Result<(), WorkerError> {
    let task = self.task.lock().take();
    match task {
      Some(task) => task
        .await
        .map_err(|e| WorkerError::Internal(format!("execution task join failed: {}", e))),
      None => Ok(()),
    }
  }

  pub(crate) fn control(&self) -> &ExecutionControl {
    &self.control
  }
}

impl fmt::Debug for ExecutionHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutionHandle")
      .field("label", &self.label)
      .field("paused", &self.control.is_paused())
      .field("stopped", &self.control.is_stopped())
      .finish()
  }
}

/// Spawns `entry(payload)` as a new execution context on the current tokio runtime.
///
/// `control` must be the same control the payload hands to code running
/// inside the context, so that pause and kill reach it.
pub fn spawn<P, F, Fut>(
  label: impl Into<String>,
  entry: F,
  payload: P,
  control: ExecutionControl,
  options: PlatformOptions,
) -> ExecutionHandle
where
  P: Send + 'static,
  F: FnOnce(P) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  spawn_tracked(label.into(), entry, payload, control, options, None, None)
}

pub(crate) fn spawn_tracked<P, F, Fut>(
  label: String,
  entry: F,
  payload: P,
  control: ExecutionControl,
  options: PlatformOptions,
  guard: Option<WaitGuard>,
  on_exit: Option<ExitHook>,
) -> ExecutionHandle
where
  P: Send + 'static,
  F: FnOnce(P) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  if options.paused {
    control.pause();
  }
  let span = tracing::debug_span!(
    "worker",
    name = %options.debug_name.as_deref().unwrap_or(&label)
  );
  let task = tokio::spawn(
    supervise(label.clone(), entry, payload, control.clone(), options, guard, on_exit).instrument(span),
  );
  ExecutionHandle {
    label,
    control,
    task: Mutex::new(Some(task)),
  }
}

async fn supervise<P, F, Fut>(
  label: String,
  entry: F,
  payload: P,
  control: ExecutionControl,
  options: PlatformOptions,
  guard: Option<WaitGuard>,
  on_exit: Option<ExitHook>,
) where
  F: FnOnce(P) -> Fut,
  Fut: Future<Output = ()>,
{
  let _guard = guard;
  let monitor = options.monitor.as_ref();
  publish(monitor, WorkerEvent::Started { worker: label.clone() });
  tracing::debug!(paused = control.is_paused(), "Execution context started");

  let outcome = tokio::select! {
    biased;
    _ = control.stopped() => None,
    result = async {
      control.gate.wait_open().await;
      match std::panic::catch_unwind(AssertUnwindSafe(|| entry(payload))) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(panic) => Err(panic),
      }
    } => Some(result),
  };

  match outcome {
    Some(Ok(())) => tracing::trace!("Entry returned; context stays live until killed"),
    Some(Err(panic)) => {
      let error_msg = panic_message(panic.as_ref());
      let fatal = options.errors_are_fatal;
      tracing::error!(error = %error_msg, fatal, "Worker entry panicked");
      publish(
        monitor,
        WorkerEvent::Failed {
          worker: label.clone(),
          error_msg,
          fatal,
        },
      );
      if fatal {
        control.stop(KillPriority::Immediate);
      }
    }
    None => tracing::trace!("Killed before the entry finished"),
  }

  control.stopped().await;
  tracing::debug!("Execution context exited");
  if let Some(on_exit) = on_exit {
    on_exit();
  }
  publish(monitor, WorkerEvent::Exited { worker: label });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
