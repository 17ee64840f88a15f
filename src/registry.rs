// src/registry.rs

use crate::error::WorkerError;
use crate::options::{RegistryOptions, SpawnOptions, ANONYMOUS_NAME_PREFIX};
use crate::relay::{CapabilityHandler, CapabilityRouter};
use crate::runtime::{KillPriority, WaitGroup};
use crate::worker::{Worker, WorkerContext, WorkerHandle};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out `__anonymous_{n}` names.
///
/// Each registry owns one by default. Clones share the counter, so several
/// registries built with [`Registry::with_allocator`] never generate the
/// same name.
#[derive(Debug, Clone, Default)]
pub struct NameAllocator {
  next: Arc<AtomicUsize>,
}

impl NameAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the next generated name, taken or not.
  pub fn next_name(&self) -> String {
    let n = self.next.fetch_add(1, Ordering::Relaxed);
    format!("{}{}", ANONYMOUS_NAME_PREFIX, n)
  }

  /// Returns the first generated name for which `is_taken` is false.
  pub fn allocate(&self, is_taken: impl Fn(&str) -> bool) -> String {
    loop {
      let name = self.next_name();
      if !is_taken(&name) {
        return name;
      }
      tracing::trace!(name = %name, "Skipping generated name already in use");
    }
  }
}

/// Addresses a worker for [`Registry::send`].
pub enum Target<'a, T> {
  Name(&'a str),
  Handle(&'a WorkerHandle<T>),
}

impl<'a, T> From<&'a str> for Target<'a, T> {
  fn from(name: &'a str) -> Self {
    Target::Name(name)
  }
}

impl<'a, T> From<&'a String> for Target<'a, T> {
  fn from(name: &'a String) -> Self {
    Target::Name(name.as_str())
  }
}

impl<'a, T> From<&'a WorkerHandle<T>> for Target<'a, T> {
  fn from(handle: &'a WorkerHandle<T>) -> Self {
    Target::Handle(handle)
  }
}

/// Named collection of workers. Sole owner of every worker it spawns.
pub struct Registry<T: Send + 'static> {
  workers: HashMap<String, Worker<T>>,
  names: NameAllocator,
  options: RegistryOptions,
  capabilities: CapabilityRouter,
  wait_group: WaitGroup,
}

impl<T: Send + 'static> Default for Registry<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Send + 'static> Registry<T> {
  pub fn new() -> Self {
    Self::with_options(RegistryOptions::default())
  }

  pub fn with_options(options: RegistryOptions) -> Self {
    Self::with_allocator(options, NameAllocator::new())
  }

  /// Builds a registry that draws anonymous names from `names`.
  pub fn with_allocator(options: RegistryOptions, names: NameAllocator) -> Self {
    Self {
      workers: HashMap::new(),
      names,
      options,
      capabilities: CapabilityRouter::new(),
      wait_group: WaitGroup::new(),
    }
  }

  pub fn options(&self) -> &RegistryOptions {
    &self.options
  }

  /// Spawns `entry` as a new worker and registers it.
  ///
  /// Returns as soon as the execution context is running; the handshake
  /// completes later and fires `on_initialized`. Payloads sent in between are
  /// buffered. Must be called from within a tokio runtime.
  pub fn spawn<F, Fut>(&mut self, entry: F, mut options: SpawnOptions<T>) -> Result<WorkerHandle<T>, WorkerError>
  where
    F: FnOnce(WorkerContext<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.reap();
    let name = match options.name.take() {
      Some(name) if name.is_empty() => {
        return Err(WorkerError::InvalidArgument("worker name must not be empty".into()));
      }
      Some(name) if self.workers.contains_key(&name) => return Err(WorkerError::DuplicateName(name)),
      Some(name) => name,
      None => self.names.allocate(|candidate| self.workers.contains_key(candidate)),
    };

    let worker = Worker::spawn(
      name.clone(),
      entry,
      options,
      self.options.mailbox_capacity,
      &self.capabilities,
      Some(self.wait_group.enter()),
    )?;
    let handle = worker.handle();
    self.workers.insert(name, worker);
    Ok(handle)
  }

  /// Sends a payload to the worker named by `target`.
  ///
  /// `InvalidArgument` for an empty name, `UnknownTarget` when no such
  /// worker is registered (including a handle to a worker already killed).
  pub fn send<'a>(&self, payload: T, target: impl Into<Target<'a, T>>) -> Result<(), WorkerError>
  where
    T: 'a,
  {
    let worker = match target.into() {
      Target::Name(name) => {
        if name.is_empty() {
          return Err(WorkerError::InvalidArgument("target name must not be empty".into()));
        }
        self
          .workers
          .get(name)
          .ok_or_else(|| WorkerError::UnknownTarget(name.to_string()))?
      }
      Target::Handle(handle) => self
        .workers
        .get(handle.name())
        .filter(|worker| handle.refers_to(worker))
        .ok_or_else(|| WorkerError::UnknownTarget(handle.name().to_string()))?,
    };
    worker.send(payload)
  }

  /// Disposes and removes the named worker. Returns false, doing nothing,
  /// when no worker has that name.
  pub fn kill(&mut self, name: &str, priority: KillPriority) -> bool {
    match self.workers.remove(name) {
      Some(worker) => {
        worker.dispose(priority);
        tracing::debug!(worker = %name, remaining = self.workers.len(), "Worker killed");
        true
      }
      None => {
        tracing::trace!(worker = %name, "Kill for unknown worker ignored");
        false
      }
    }
  }

  /// Removes workers whose execution context has exited on its own, for
  /// example after a fatal panic. Returns how many were removed.
  ///
  /// `spawn` calls this first, so a dead worker's name can be reused.
  pub fn reap(&mut self) -> usize {
    let before = self.workers.len();
    self.workers.retain(|name, worker| {
      let dead = worker.is_disposed();
      if dead {
        tracing::debug!(worker = %name, "Reaping exited worker");
      }
      !dead
    });
    before - self.workers.len()
  }

  pub fn get(&self, name: &str) -> Option<&Worker<T>> {
    self.workers.get(name)
  }

  pub fn handle(&self, name: &str) -> Option<WorkerHandle<T>> {
    self.workers.get(name).map(Worker::handle)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.workers.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.workers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.workers.is_empty()
  }

  /// Registered names, in no particular order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.workers.keys().map(String::as_str)
  }

  /// Installs the parent-side handler for a capability workers may call.
  /// Returns true if it replaced an earlier handler.
  pub fn register_capability(&self, name: impl Into<String>, handler: impl CapabilityHandler) -> bool {
    self.capabilities.register(name, handler)
  }

  pub fn capabilities(&self) -> &CapabilityRouter {
    &self.capabilities
  }

  /// Number of execution contexts that have not finished yet, including
  /// those of workers already removed from the registry.
  pub fn live_contexts(&self) -> usize {
    self.wait_group.count()
  }

  /// Disposes every worker and empties the registry.
  pub fn shutdown(&mut self, priority: KillPriority) {
    if self.workers.is_empty() {
      return;
    }
    tracing::debug!(count = self.workers.len(), ?priority, "Shutting down all workers");
    for (_, worker) in self.workers.drain() {
      worker.dispose(priority);
    }
  }

  /// Shuts down and waits for every execution context to finish.
  ///
  /// Fails with `Timeout` if they have not all exited within
  /// `RegistryOptions::term_timeout`.
  pub async fn term(mut self) -> Result<(), WorkerError> {
    self.shutdown(KillPriority::Immediate);
    let limit = self.options.term_timeout;
    match tokio::time::timeout(limit, self.wait_group.wait()).await {
      Ok(()) => {
        tracing::debug!("Registry terminated");
        Ok(())
      }
      Err(_) => {
        tracing::warn!(
          timeout = ?limit,
          remaining = self.wait_group.count(),
          "Execution contexts still running after term timeout"
        );
        Err(WorkerError::Timeout)
      }
    }
  }
}

impl<T: Send + 'static> fmt::Debug for Registry<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registry")
      .field("workers", &self.workers.keys().collect::<Vec<_>>())
      .field("options", &self.options)
      .field("capabilities", &self.capabilities)
      .field("live_contexts", &self.wait_group.count())
      .finish()
  }
}
