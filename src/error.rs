// src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum WorkerError {
  // --- Registry Errors ---
  #[error("A worker named '{0}' is already registered")]
  DuplicateName(String),
  #[error("No worker registered under the name '{0}'")]
  UnknownTarget(String),
  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Channel Errors ---
  #[error("Channel closed")]
  ChannelClosed, // Send after dispose, or peer gone
  #[error("Resource limit reached (mailbox full)")]
  ResourceLimitReached, // Bounded mailbox at capacity

  // --- Timeouts ---
  #[error("Worker handshake did not complete in time")]
  HandshakeTimeout,
  #[error("Operation timed out")]
  Timeout,

  // --- State Errors ---
  #[error("Operation is invalid for the current state: {0}")]
  InvalidState(&'static str),

  // --- Capability Relay Errors ---
  #[error("Capability not available: {0}")]
  UnsupportedCapability(String),
  #[error("Capability call failed: {0}")]
  CapabilityFailed(String),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl WorkerError {
  /// True for conditions that only mean "the message went nowhere".
  /// Callers may log and carry on.
  pub fn is_delivery_failure(&self) -> bool {
    matches!(self, WorkerError::ChannelClosed | WorkerError::ResourceLimitReached)
  }
}

impl<T> From<async_channel::TrySendError<T>> for WorkerError {
  fn from(e: async_channel::TrySendError<T>) -> Self {
    match e {
      async_channel::TrySendError::Full(_) => WorkerError::ResourceLimitReached,
      async_channel::TrySendError::Closed(_) => WorkerError::ChannelClosed,
    }
  }
}
