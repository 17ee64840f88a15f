// src/worker/mod.rs

//! A worker: one supervised execution context plus the parent-side
//! messenger that talks to it.

pub mod context;
pub mod events;
pub mod platform;

pub use context::WorkerContext;
pub use events::{monitor, MonitorReceiver, MonitorSender, WorkerEvent, DEFAULT_MONITOR_CAPACITY};
pub use platform::{ExecutionHandle, PlatformOptions};

use crate::error::WorkerError;
use crate::messenger::{Handlers, Messenger};
use crate::options::SpawnOptions;
use crate::relay::{self, CapabilityRouter};
use crate::runtime::{ExecutionControl, KillPriority, WaitGuard};

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Parent-side owner of one worker.
///
/// Dropping a `Worker` disposes it with [`KillPriority::Immediate`].
pub struct Worker<T: Send + 'static> {
  name: String,
  messenger: Messenger<T>,
  execution: ExecutionHandle,
  capabilities: Vec<String>,
}

impl<T: Send + 'static> Worker<T> {
  /// Creates the parent messenger, starts listening on it and spawns the
  /// execution context with the bootstrap [`WorkerContext`].
  ///
  /// Returns before the handshake completes.
  pub(crate) fn spawn<F, Fut>(
    name: String,
    entry: F,
    options: SpawnOptions<T>,
    mailbox_capacity: Option<usize>,
    router: &CapabilityRouter,
    guard: Option<WaitGuard>,
  ) -> Result<Self, WorkerError>
  where
    F: FnOnce(WorkerContext<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let SpawnOptions {
      on_receive,
      on_error,
      on_initialized,
      capabilities,
      platform: platform_options,
      ..
    } = options;

    let control = ExecutionControl::default();
    let messenger = Messenger::new(mailbox_capacity);

    let monitor = platform_options.monitor.clone();
    let worker_name = name.clone();
    messenger.on_connected(move || {
      tracing::debug!(worker = %worker_name, "Worker handshake received");
      events::publish(monitor.as_ref(), WorkerEvent::Initialized { worker: worker_name });
      if let Some(on_initialized) = on_initialized {
        on_initialized();
      }
    });

    let mut handlers: Handlers<T> = match on_receive {
      Some(on_receive) => Handlers::new(on_receive),
      None => {
        let worker_name = name.clone();
        Handlers::new(move |_: T| tracing::trace!(worker = %worker_name, "Dropping payload, no receive callback"))
      }
    };
    handlers = match on_error {
      Some(on_error) => handlers.on_error(on_error),
      None => {
        let worker_name = name.clone();
        handlers.on_error(move |e| tracing::warn!(worker = %worker_name, error = %e, "Worker messenger error"))
      }
    };
    messenger.listen(handlers)?;

    let client = if capabilities.is_empty() {
      None
    } else {
      let (client, calls) = relay::relay_channel(name.clone(), capabilities.clone());
      relay::spawn_relay_task(name.clone(), router.clone(), calls, control.stop.child());
      Some(client)
    };

    let context = WorkerContext::new(name.clone(), messenger.address(), control.clone(), mailbox_capacity, client);
    // An exited context can never answer: close the parent side so sends
    // fail instead of piling up in the pending queue.
    let parent = messenger.clone();
    let on_exit: platform::ExitHook = Box::new(move || parent.dispose());
    let execution = platform::spawn_tracked(
      name.clone(),
      entry,
      context,
      control,
      platform_options,
      guard,
      Some(on_exit),
    );
    tracing::debug!(worker = %name, endpoint_id = messenger.address().id(), "Worker spawned");

    Ok(Self {
      name,
      messenger,
      execution,
      capabilities,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The parent side of the worker's channel.
  pub fn messenger(&self) -> &Messenger<T> {
    &self.messenger
  }

  /// Capability names this worker was granted.
  pub fn capabilities(&self) -> &[String] {
    &self.capabilities
  }

  pub fn execution(&self) -> &ExecutionHandle {
    &self.execution
  }

  /// True once the worker's handshake has reached the parent.
  pub fn is_initialized(&self) -> bool {
    self.messenger.is_connected()
  }

  /// Waits for the handshake. `None` waits indefinitely.
  pub async fn wait_initialized(&self, timeout: Option<Duration>) -> Result<(), WorkerError> {
    wait_initialized(&self.messenger, self.execution.control(), timeout).await
  }

  /// Sends a payload to the worker. Buffered until the handshake completes.
  pub fn send(&self, payload: T) -> Result<(), WorkerError> {
    self.messenger.send(payload)
  }

  pub fn pause(&self) {
    self.execution.pause();
  }

  pub fn resume(&self) {
    self.execution.resume();
  }

  pub fn is_paused(&self) -> bool {
    self.execution.is_paused()
  }

  /// Kills the execution context and closes the parent messenger.
  ///
  /// Safe before the handshake completes and safe to repeat.
  pub fn dispose(&self, priority: KillPriority) {
    if self.messenger.is_disposed() {
      return;
    }
    tracing::debug!(worker = %self.name, ?priority, "Disposing worker");
    self.execution.kill(priority);
    self.messenger.dispose();
  }

  pub fn is_disposed(&self) -> bool {
    self.messenger.is_disposed()
  }

  /// A cloneable handle for sending to and controlling this worker.
  pub fn handle(&self) -> WorkerHandle<T> {
    WorkerHandle {
      name: self.name.clone(),
      messenger: self.messenger.clone(),
      control: self.execution.control().clone(),
    }
  }
}

impl<T: Send + 'static> Drop for Worker<T> {
  fn drop(&mut self) {
    self.dispose(KillPriority::Immediate);
  }
}

impl<T: Send + 'static> fmt::Debug for Worker<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Worker")
      .field("name", &self.name)
      .field("messenger", &self.messenger)
      .field("execution", &self.execution)
      .field("capabilities", &self.capabilities)
      .finish()
  }
}

/// Lightweight reference to a worker, returned by `Registry::spawn`.
///
/// Holding a handle does not keep the worker alive: once the registry kills
/// it, sends through the handle fail with `ChannelClosed`.
pub struct WorkerHandle<T> {
  name: String,
  messenger: Messenger<T>,
  control: ExecutionControl,
}

impl<T> Clone for WorkerHandle<T> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      messenger: self.messenger.clone(),
      control: self.control.clone(),
    }
  }
}

impl<T: Send + 'static> WorkerHandle<T> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn send(&self, payload: T) -> Result<(), WorkerError> {
    self.messenger.send(payload)
  }

  pub fn is_alive(&self) -> bool {
    !self.messenger.is_disposed() && !self.control.is_stopped()
  }

  pub fn is_initialized(&self) -> bool {
    self.messenger.is_connected()
  }

  pub async fn wait_initialized(&self, timeout: Option<Duration>) -> Result<(), WorkerError> {
    wait_initialized(&self.messenger, &self.control, timeout).await
  }

  pub fn pause(&self) {
    self.control.pause();
  }

  pub fn resume(&self) {
    self.control.resume();
  }

  pub fn is_paused(&self) -> bool {
    self.control.is_paused()
  }

  /// True if both refer to the same spawned worker, not merely the same name.
  pub(crate) fn refers_to(&self, worker: &Worker<T>) -> bool {
    self.messenger.address() == worker.messenger.address()
  }
}

impl<T> fmt::Debug for WorkerHandle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerHandle").field("name", &self.name).finish_non_exhaustive()
  }
}

async fn wait_initialized<T: Send + 'static>(
  messenger: &Messenger<T>,
  control: &ExecutionControl,
  timeout: Option<Duration>,
) -> Result<(), WorkerError> {
  let handshake = async {
    tokio::select! {
      biased;
      _ = messenger.wait_connected() => Ok(()),
      // A worker stopped before initializing will never connect.
      _ = control.stopped() => {
        if messenger.is_connected() {
          Ok(())
        } else {
          Err(WorkerError::ChannelClosed)
        }
      }
    }
  };
  match timeout {
    Some(limit) => tokio::time::timeout(limit, handshake)
      .await
      .map_err(|_| WorkerError::HandshakeTimeout)?,
    None => handshake.await,
  }
}
