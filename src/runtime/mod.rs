// src/runtime/mod.rs

//! Core asynchronous primitives: mailboxes, frames, the pause gate, stop
//! signals and the wait group used for termination.

pub mod control;
pub mod gate;
pub mod mailbox;
pub mod stop;
pub(crate) mod waitgroup;

pub use control::ExecutionControl;
pub use gate::PauseGate;
pub use mailbox::{mailbox, Endpoint, Frame, Inbound};
pub use stop::{KillPriority, StopSignal};

pub(crate) use waitgroup::{WaitGroup, WaitGuard};
