// src/relay.rs

//! Relaying calls to named external capabilities from a worker to its parent.
//!
//! A worker spawned with a list of capability names receives a
//! [`CapabilityClient`]. Each call is packaged as a [`CapabilityCall`]
//! (`capability`, `request`, `source`) and sent over a channel separate from
//! the worker's messenger. A relay task on the parent side looks the
//! capability up in the registry's [`CapabilityRouter`], performs the real
//! call and answers on the call's reply channel.

use crate::error::WorkerError;
use crate::runtime::StopSignal;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Number of calls a worker may have queued toward the parent.
pub const DEFAULT_RELAY_CAPACITY: usize = 64;

/// Performs the real work behind a capability, on the parent side.
#[async_trait]
pub trait CapabilityHandler: Send + Sync + 'static {
  /// `source` is the name of the calling worker.
  async fn call(&self, request: Bytes, source: &str) -> Result<Bytes, WorkerError>;
}

/// Adapter turning an async closure into a [`CapabilityHandler`].
pub struct FnHandler<F>(F);

/// Wraps `f(request, source)` as a capability handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
  F: Fn(Bytes, String) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Bytes, WorkerError>> + Send + 'static,
{
  FnHandler(f)
}

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
  F: Fn(Bytes, String) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Bytes, WorkerError>> + Send + 'static,
{
  async fn call(&self, request: Bytes, source: &str) -> Result<Bytes, WorkerError> {
    (self.0)(request, source.to_string()).await
  }
}

/// One relayed call, as it travels from worker to parent.
pub struct CapabilityCall {
  pub capability: String,
  pub request: Bytes,
  /// Name of the worker that made the call.
  pub source: String,
  reply_tx: oneshot::Sender<Result<Bytes, WorkerError>>,
}

impl CapabilityCall {
  /// Answers the call. A caller that stopped waiting is ignored.
  pub fn reply(self, result: Result<Bytes, WorkerError>) {
    let _ = self.reply_tx.send(result);
  }
}

impl fmt::Debug for CapabilityCall {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CapabilityCall")
      .field("capability", &self.capability)
      .field("request_len", &self.request.len())
      .field("source", &self.source)
      .finish()
  }
}

/// Parent-side table of capability handlers, keyed by capability name.
/// Cloning shares the table.
#[derive(Clone, Default)]
pub struct CapabilityRouter {
  handlers: Arc<RwLock<HashMap<String, Arc<dyn CapabilityHandler>>>>,
}

impl CapabilityRouter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Installs `handler` under `name`, returning whether one was replaced.
  pub fn register(&self, name: impl Into<String>, handler: impl CapabilityHandler) -> bool {
    let name = name.into();
    tracing::debug!(capability = %name, "Registering capability handler");
    self.handlers.write().insert(name, Arc::new(handler)).is_some()
  }

  pub fn unregister(&self, name: &str) -> bool {
    self.handlers.write().remove(name).is_some()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.handlers.read().contains_key(name)
  }

  /// Performs one call and replies to it.
  pub async fn dispatch(&self, call: CapabilityCall) {
    // Clone the handler out so the lock is not held across the await.
    let handler = self.handlers.read().get(&call.capability).cloned();
    let result = match handler {
      Some(handler) => handler.call(call.request.clone(), &call.source).await,
      None => {
        tracing::warn!(capability = %call.capability, source = %call.source, "No handler for relayed capability");
        Err(WorkerError::UnsupportedCapability(call.capability.clone()))
      }
    };
    call.reply(result);
  }
}

impl fmt::Debug for CapabilityRouter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handlers = self.handlers.read();
    f.debug_struct("CapabilityRouter")
      .field("capabilities", &handlers.keys().collect::<Vec<_>>())
      .finish()
  }
}

/// Worker-side handle for calling the capabilities it was granted.
#[derive(Clone)]
pub struct CapabilityClient {
  source: String,
  permitted: Arc<[String]>,
  tx: async_channel::Sender<CapabilityCall>,
}

impl CapabilityClient {
  /// Capability names this worker may call, in the order they were granted.
  pub fn permitted(&self) -> &[String] {
    &self.permitted
  }

  pub fn is_permitted(&self, capability: &str) -> bool {
    self.permitted.iter().any(|name| name == capability)
  }

  /// Relays a call to the parent and waits for its answer.
  ///
  /// Fails with `UnsupportedCapability` for a name this worker was not
  /// granted, and with `ChannelClosed` if the parent side is gone.
  pub async fn call(&self, capability: &str, request: impl Into<Bytes>) -> Result<Bytes, WorkerError> {
    if !self.is_permitted(capability) {
      return Err(WorkerError::UnsupportedCapability(capability.to_string()));
    }
    let (reply_tx, reply_rx) = oneshot::channel();
    let call = CapabilityCall {
      capability: capability.to_string(),
      request: request.into(),
      source: self.source.clone(),
      reply_tx,
    };
    tracing::trace!(worker = %self.source, capability, "Relaying capability call");
    self.tx.send(call).await.map_err(|_| WorkerError::ChannelClosed)?;
    reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
  }
}

impl fmt::Debug for CapabilityClient {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CapabilityClient")
      .field("source", &self.source)
      .field("permitted", &self.permitted)
      .finish()
  }
}

/// Creates the client for `source` and the receiving end the relay task drains.
pub(crate) fn relay_channel(
  source: String,
  permitted: Vec<String>,
) -> (CapabilityClient, async_channel::Receiver<CapabilityCall>) {
  let (tx, rx) = async_channel::bounded(DEFAULT_RELAY_CAPACITY);
  let client = CapabilityClient {
    source,
    permitted: permitted.into(),
    tx,
  };
  (client, rx)
}

/// Serves relayed calls in arrival order until `stop` fires or every client is dropped.
pub(crate) fn spawn_relay_task(
  worker: String,
  router: CapabilityRouter,
  calls: async_channel::Receiver<CapabilityCall>,
  stop: StopSignal,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    tracing::trace!(worker = %worker, "Capability relay started");
    loop {
      let call = tokio::select! {
        biased;
        _ = stop.stopped() => break,
        call = calls.recv() => match call {
          Ok(call) => call,
          Err(_) => break,
        },
      };
      router.dispatch(call).await;
    }
    calls.close();
    tracing::trace!(worker = %worker, "Capability relay stopped");
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn calls_reach_the_registered_handler() {
    let router = CapabilityRouter::new();
    router.register(
      "upper",
      handler_fn(|req: Bytes, source: String| async move {
        let mut out = source.into_bytes();
        out.push(b':');
        out.extend(req.to_ascii_uppercase());
        Ok(Bytes::from(out))
      }),
    );

    let (client, rx) = relay_channel("w1".into(), vec!["upper".into(), "missing".into()]);
    let stop = StopSignal::new();
    let task = spawn_relay_task("w1".into(), router.clone(), rx, stop.clone());

    assert_eq!(client.call("upper", "abc").await.unwrap(), Bytes::from_static(b"w1:ABC"));
    assert_eq!(
      client.call("missing", Bytes::new()).await,
      Err(WorkerError::UnsupportedCapability("missing".into()))
    );
    assert_eq!(
      client.call("forbidden", Bytes::new()).await,
      Err(WorkerError::UnsupportedCapability("forbidden".into()))
    );

    assert!(router.unregister("upper"));
    assert!(!router.unregister("upper"));
    assert!(!router.contains("upper"));
    assert_eq!(
      client.call("upper", "abc").await,
      Err(WorkerError::UnsupportedCapability("upper".into()))
    );

    stop.stop(crate::runtime::KillPriority::Immediate);
    task.await.unwrap();
    assert_eq!(client.call("upper", "x").await, Err(WorkerError::ChannelClosed));
  }
}
