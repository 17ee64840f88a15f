// src/worker/context.rs

use crate::error::WorkerError;
use crate::messenger::Messenger;
use crate::relay::CapabilityClient;
use crate::runtime::{Endpoint, ExecutionControl};

use std::fmt;

/// The bootstrap payload a worker's entry function receives.
///
/// It carries the parent's inbound address and the worker's name. The entry
/// must call [`initialize`](Self::initialize) before it can talk to the
/// parent; until then the parent side stays disconnected.
pub struct WorkerContext<T> {
  name: String,
  parent: Endpoint<T>,
  control: ExecutionControl,
  mailbox_capacity: Option<usize>,
  capabilities: Option<CapabilityClient>,
  initialized: bool,
}

impl<T: Send + 'static> WorkerContext<T> {
  pub(crate) fn new(
    name: String,
    parent: Endpoint<T>,
    control: ExecutionControl,
    mailbox_capacity: Option<usize>,
    capabilities: Option<CapabilityClient>,
  ) -> Self {
    Self {
      name,
      parent,
      control,
      mailbox_capacity,
      capabilities,
      initialized: false,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The parent's inbound address, as delivered by the spawn call.
  pub fn parent_address(&self) -> &Endpoint<T> {
    &self.parent
  }

  /// Relay client for the external capabilities this worker may call.
  /// `None` when the worker was spawned without any.
  pub fn capabilities(&self) -> Option<&CapabilityClient> {
    self.capabilities.as_ref()
  }

  /// True once this worker has been asked to terminate.
  pub fn is_stopping(&self) -> bool {
    self.control.is_stopped()
  }

  /// Resolves when this worker has been asked to terminate.
  pub async fn stopped(&self) {
    self.control.stopped().await
  }

  /// Completes the worker's half of the handshake.
  ///
  /// Builds the worker-side messenger already connected to the parent and
  /// sends the parent this messenger's own address. The returned messenger's
  /// delivery loop obeys this worker's pause and kill requests once
  /// `listen` is called.
  pub fn initialize(&mut self) -> Result<Messenger<T>, WorkerError> {
    if self.initialized {
      return Err(WorkerError::InvalidState("worker already initialized"));
    }
    let messenger = Messenger::with_control(self.mailbox_capacity, &self.control);
    messenger.connect_to(self.parent.clone())?;
    messenger.send_handshake()?;
    self.initialized = true;
    tracing::debug!(
      worker = %self.name,
      endpoint_id = messenger.address().id(),
      parent_id = self.parent.id(),
      "Worker initialized, handshake sent"
    );
    Ok(messenger)
  }
}

impl<T> fmt::Debug for WorkerContext<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerContext")
      .field("name", &self.name)
      .field("parent", &self.parent)
      .field("initialized", &self.initialized)
      .finish_non_exhaustive()
  }
}
