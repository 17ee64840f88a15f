// src/options.rs

use crate::error::WorkerError;
use crate::worker::events::MonitorSender;
use crate::worker::platform::PlatformOptions;

use std::fmt;
use std::time::Duration;

/// Prefix of the names generated for workers spawned without one.
pub const ANONYMOUS_NAME_PREFIX: &str = "__anonymous_";
/// How long `Registry::term` waits for execution contexts to finish.
pub const DEFAULT_TERM_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type ReceiveCallback<T> = Box<dyn FnMut(T) + Send + 'static>;
pub(crate) type SpawnErrorCallback = Box<dyn FnMut(WorkerError) + Send + 'static>;
pub(crate) type InitializedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Registry-wide settings.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
  /// Capacity of every mailbox the registry creates. `None` is unbounded.
  pub mailbox_capacity: Option<usize>,
  pub term_timeout: Duration,
}

impl Default for RegistryOptions {
  fn default() -> Self {
    Self {
      mailbox_capacity: None,
      term_timeout: DEFAULT_TERM_TIMEOUT,
    }
  }
}

impl RegistryOptions {
  pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
    self.mailbox_capacity = Some(capacity);
    self
  }

  pub fn term_timeout(mut self, timeout: Duration) -> Self {
    self.term_timeout = timeout;
    self
  }
}

/// Settings for one `Registry::spawn` call.
///
/// ```ignore
/// let opts = SpawnOptions::new()
///   .name("resizer")
///   .on_receive(|msg: Job| println!("{msg:?}"))
///   .capability("fs.read");
/// ```
pub struct SpawnOptions<T> {
  pub(crate) name: Option<String>,
  pub(crate) on_receive: Option<ReceiveCallback<T>>,
  pub(crate) on_error: Option<SpawnErrorCallback>,
  pub(crate) on_initialized: Option<InitializedCallback>,
  pub(crate) capabilities: Vec<String>,
  pub(crate) platform: PlatformOptions,
}

impl<T> Default for SpawnOptions<T> {
  fn default() -> Self {
    Self {
      name: None,
      on_receive: None,
      on_error: None,
      on_initialized: None,
      capabilities: Vec::new(),
      platform: PlatformOptions::default(),
    }
  }
}

impl<T> SpawnOptions<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Explicit registry key. A generated `__anonymous_{n}` name is used otherwise.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Receives every payload the worker sends to its parent.
  pub fn on_receive(mut self, f: impl FnMut(T) + Send + 'static) -> Self {
    self.on_receive = Some(Box::new(f));
    self
  }

  /// Receives protocol errors seen by the parent-side listener.
  pub fn on_error(mut self, f: impl FnMut(WorkerError) + Send + 'static) -> Self {
    self.on_error = Some(Box::new(f));
    self
  }

  /// Runs once, when the worker's handshake arrives.
  pub fn on_initialized(mut self, f: impl FnOnce() + Send + 'static) -> Self {
    self.on_initialized = Some(Box::new(f));
    self
  }

  /// Grants the worker one external capability.
  pub fn capability(mut self, name: impl Into<String>) -> Self {
    let name = name.into();
    if !self.capabilities.contains(&name) {
      self.capabilities.push(name);
    }
    self
  }

  pub fn capabilities<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    for name in names {
      self = self.capability(name);
    }
    self
  }

  pub fn paused(mut self, paused: bool) -> Self {
    self.platform.paused = paused;
    self
  }

  pub fn errors_are_fatal(mut self, fatal: bool) -> Self {
    self.platform.errors_are_fatal = fatal;
    self
  }

  pub fn monitor(mut self, monitor: MonitorSender) -> Self {
    self.platform.monitor = Some(monitor);
    self
  }

  pub fn debug_name(mut self, label: impl Into<String>) -> Self {
    self.platform.debug_name = Some(label.into());
    self
  }
}

impl<T> fmt::Debug for SpawnOptions<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpawnOptions")
      .field("name", &self.name)
      .field("on_receive", &self.on_receive.is_some())
      .field("on_error", &self.on_error.is_some())
      .field("on_initialized", &self.on_initialized.is_some())
      .field("capabilities", &self.capabilities)
      .field("platform", &self.platform)
      .finish()
  }
}
