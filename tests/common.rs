// tests/common.rs
#![allow(dead_code)] // Not every test file uses every helper

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use workline::{Handlers, MonitorReceiver, Registry, RegistryOptions, WorkerContext, WorkerError, WorkerEvent};

use std::sync::Once;
use std::time::Duration;

use tokio::time::timeout;

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(250);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(2);

static TRACING_INIT: Once = Once::new();

pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "workline=trace,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_span_events(FmtSpan::CLOSE)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

// Helper to create a registry with tracing enabled
pub fn test_registry<T: Send + 'static>() -> Registry<T> {
  setup_tracing();
  Registry::with_options(RegistryOptions::default().term_timeout(LONG_TIMEOUT))
}

/// A receive callback paired with the channel it feeds.
pub fn collector<T: Send + 'static>() -> (impl FnMut(T) + Send + 'static, async_channel::Receiver<T>) {
  let (tx, rx) = async_channel::unbounded();
  (
    move |value: T| {
      let _ = tx.try_send(value);
    },
    rx,
  )
}

// Helper for recv with timeout assertion
pub async fn recv_timeout<T>(rx: &async_channel::Receiver<T>, duration: Duration) -> Result<T, WorkerError> {
  match timeout(duration, rx.recv()).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(_)) => Err(WorkerError::ChannelClosed),
    Err(_) => Err(WorkerError::Timeout),
  }
}

/// Asserts nothing arrives within `duration`.
pub async fn assert_silent<T: std::fmt::Debug>(rx: &async_channel::Receiver<T>, duration: Duration) {
  match timeout(duration, rx.recv()).await {
    Ok(Ok(value)) => panic!("Expected no message, received {:?}", value),
    Ok(Err(_)) | Err(_) => {}
  }
}

/// Worker entry that answers every `n` with `n + 1`.
pub async fn echo_plus_one(mut ctx: WorkerContext<u32>) {
  let messenger = match ctx.initialize() {
    Ok(messenger) => messenger,
    Err(e) => panic!("initialize failed: {}", e),
  };
  let reply = messenger.clone();
  messenger
    .listen(Handlers::new(move |n: u32| {
      let _ = reply.send(n + 1);
    }))
    .expect("worker listen failed");
}

// --- Helper function to wait for specific monitor event ---
pub async fn wait_for_monitor_event(
  monitor_rx: &MonitorReceiver,
  duration: Duration,
  check_event: impl Fn(&WorkerEvent) -> bool,
) -> Result<WorkerEvent, String> {
  let deadline = tokio::time::Instant::now() + duration;
  loop {
    match tokio::time::timeout_at(deadline, monitor_rx.recv()).await {
      Ok(Ok(event)) => {
        if check_event(&event) {
          return Ok(event);
        }
      }
      Ok(Err(_)) => return Err("Monitor channel closed unexpectedly".to_string()),
      Err(_) => return Err(format!("Timeout waiting for monitor event after {:?}", duration)),
    }
  }
}
