//! workline - isolated async workers that talk to their parent only through
//! message passing, built on Tokio.
//!
//! A [`Registry`] spawns named workers. Each worker gets a private two-way
//! channel to its parent, set up by a one-message handshake: the worker's
//! entry receives a [`WorkerContext`], calls
//! [`initialize`](WorkerContext::initialize) and gets back a [`Messenger`]
//! already connected to the parent.

pub mod error;
pub mod messenger;
pub mod options;
pub mod registry;
pub mod relay;
pub mod runtime;
pub mod worker;

// Re-export core types for user convenience
pub use error::WorkerError;
pub use messenger::{Handlers, Messenger};
pub use options::{RegistryOptions, SpawnOptions, ANONYMOUS_NAME_PREFIX, DEFAULT_TERM_TIMEOUT};
pub use registry::{NameAllocator, Registry, Target};
pub use relay::{handler_fn, CapabilityCall, CapabilityClient, CapabilityHandler, CapabilityRouter};
pub use runtime::{Endpoint, Frame, KillPriority};
pub use worker::{
  monitor, ExecutionHandle, MonitorReceiver, MonitorSender, PlatformOptions, Worker, WorkerContext, WorkerEvent,
  WorkerHandle, DEFAULT_MONITOR_CAPACITY,
};

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

pub fn version_major() -> i32 {
  VERSION_MAJOR
}

pub fn version_minor() -> i32 {
  VERSION_MINOR
}

pub fn version_patch() -> i32 {
  VERSION_PATCH
}
