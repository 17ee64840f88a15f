// src/messenger.rs

//! Bidirectional messaging over a pair of one-directional mailboxes.
//!
//! A [`Messenger`] owns its inbound mailbox and holds the address of the
//! peer's inbound mailbox. Two messengers created independently find each
//! other through a single `Handshake` frame: whoever already knows the other
//! side's address connects to it and sends its own address back; the
//! receiver's delivery loop consumes that frame and connects in turn.

use crate::error::WorkerError;
use crate::runtime::{mailbox, Endpoint, ExecutionControl, Frame, Inbound, KillPriority};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

pub type DataCallback<T> = Box<dyn FnMut(T) + Send + 'static>;
pub type ErrorCallback = Box<dyn FnMut(WorkerError) + Send + 'static>;
pub type DoneCallback = Box<dyn FnOnce() + Send + 'static>;
pub type ConnectedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks driven by a messenger's delivery loop.
pub struct Handlers<T> {
  on_data: DataCallback<T>,
  on_error: Option<ErrorCallback>,
  on_done: Option<DoneCallback>,
}

impl<T> Handlers<T> {
  /// `on_data` receives every data frame, in arrival order.
  pub fn new(on_data: impl FnMut(T) + Send + 'static) -> Self {
    Self {
      on_data: Box::new(on_data),
      on_error: None,
      on_done: None,
    }
  }

  /// Called for protocol problems seen by the delivery loop (for example a
  /// second handshake). The loop keeps running afterwards.
  pub fn on_error(mut self, on_error: impl FnMut(WorkerError) + Send + 'static) -> Self {
    self.on_error = Some(Box::new(on_error));
    self
  }

  /// Called once when the delivery loop ends.
  pub fn on_done(mut self, on_done: impl FnOnce() + Send + 'static) -> Self {
    self.on_done = Some(Box::new(on_done));
    self
  }
}

impl<T> fmt::Debug for Handlers<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handlers")
      .field("on_error", &self.on_error.is_some())
      .field("on_done", &self.on_done.is_some())
      .finish_non_exhaustive()
  }
}

/// Where outgoing payloads go.
enum Outbound<T> {
  /// No peer yet. Payloads wait here and are flushed on connection.
  Pending(VecDeque<T>),
  Connected(Endpoint<T>),
}

enum ConnectedHook {
  Waiting(Option<ConnectedCallback>),
  Fired,
}

struct MessengerInner<T> {
  address: Endpoint<T>,
  /// Present until `listen` takes it.
  inbound: Mutex<Option<Inbound<T>>>,
  outbound: Mutex<Outbound<T>>,
  capacity: Option<usize>,
  connected: watch::Sender<bool>,
  hook: Mutex<ConnectedHook>,
  disposed: AtomicBool,
  /// Consulted by the delivery loop before each frame.
  control: ExecutionControl,
}

/// One side of a private two-way channel.
///
/// Cloning yields another handle to the same messenger.
pub struct Messenger<T> {
  inner: Arc<MessengerInner<T>>,
}

impl<T> Clone for Messenger<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T: Send + 'static> Messenger<T> {
  /// Creates a disconnected messenger with its own inbound mailbox.
  ///
  /// Payloads sent before [`connect_to`](Self::connect_to) are held and
  /// flushed, in order, once a peer is known. `capacity` bounds both the
  /// inbound mailbox and that pending queue; `None` means unbounded.
  pub fn new(capacity: Option<usize>) -> Self {
    Self::with_control(capacity, &ExecutionControl::default())
  }

  /// Creates a messenger that is already connected to `peer`.
  pub fn connected_to(peer: Endpoint<T>, capacity: Option<usize>) -> Self {
    let messenger = Self::new(capacity);
    // A fresh messenger cannot already be connected.
    let _ = messenger.connect_to(peer);
    messenger
  }

  pub(crate) fn with_control(capacity: Option<usize>, control: &ExecutionControl) -> Self {
    let (address, inbound) = mailbox(capacity);
    let (connected, _) = watch::channel(false);
    tracing::trace!(endpoint_id = address.id(), "Messenger created");
    Self {
      inner: Arc::new(MessengerInner {
        address,
        inbound: Mutex::new(Some(inbound)),
        outbound: Mutex::new(Outbound::Pending(VecDeque::new())),
        capacity,
        connected,
        hook: Mutex::new(ConnectedHook::Waiting(None)),
        disposed: AtomicBool::new(false),
        // Own child signal: disposing this messenger must not stop its owner.
        control: control.child(),
      }),
    }
  }

  /// The address of this messenger's inbound mailbox.
  pub fn address(&self) -> Endpoint<T> {
    self.inner.address.clone()
  }

  /// The peer's address, once connected.
  pub fn peer_address(&self) -> Option<Endpoint<T>> {
    match &*self.inner.outbound.lock() {
      Outbound::Connected(peer) => Some(peer.clone()),
      Outbound::Pending(_) => None,
    }
  }

  pub fn is_connected(&self) -> bool {
    *self.inner.connected.borrow()
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.disposed.load(Ordering::Acquire)
  }

  /// Registers the callback fired when the messenger connects.
  ///
  /// Runs immediately on the calling thread if the messenger is already
  /// connected. Replaces a callback registered earlier that has not fired.
  pub fn on_connected(&self, callback: impl FnOnce() + Send + 'static) {
    let mut hook = self.inner.hook.lock();
    match &mut *hook {
      ConnectedHook::Waiting(slot) => *slot = Some(Box::new(callback)),
      ConnectedHook::Fired => {
        drop(hook);
        callback();
      }
    }
  }

  /// Waits until the messenger is connected.
  pub async fn wait_connected(&self) {
    let mut rx = self.inner.connected.subscribe();
    let _ = rx.wait_for(|connected| *connected).await;
  }

  /// Points the messenger at `peer` and flushes anything sent so far.
  ///
  /// A messenger connects at most once; a second call is rejected with
  /// `InvalidState` and leaves the existing connection untouched.
  pub fn connect_to(&self, peer: Endpoint<T>) -> Result<(), WorkerError> {
    if self.is_disposed() {
      return Err(WorkerError::ChannelClosed);
    }
    {
      let mut outbound = self.inner.outbound.lock();
      let pending = match &mut *outbound {
        Outbound::Connected(_) => return Err(WorkerError::InvalidState("messenger already connected")),
        Outbound::Pending(queue) => std::mem::take(queue),
      };
      let flushed = pending.len();
      for payload in pending {
        if let Err(e) = peer.send(Frame::Data(payload)) {
          tracing::warn!(
            endpoint_id = self.inner.address.id(),
            peer_id = peer.id(),
            error = %e,
            "Dropping payload queued before connection"
          );
        }
      }
      tracing::debug!(
        endpoint_id = self.inner.address.id(),
        peer_id = peer.id(),
        flushed,
        "Messenger connected"
      );
      *outbound = Outbound::Connected(peer);
    }
    self.inner.connected.send_replace(true);

    let callback = match std::mem::replace(&mut *self.inner.hook.lock(), ConnectedHook::Fired) {
      ConnectedHook::Waiting(callback) => callback,
      ConnectedHook::Fired => None,
    };
    if let Some(callback) = callback {
      callback();
    }
    Ok(())
  }

  /// Sends a payload to the peer without waiting.
  ///
  /// Before connection the payload is queued locally. After `dispose` this
  /// returns `ChannelClosed`; a peer that has gone away yields the same.
  pub fn send(&self, payload: T) -> Result<(), WorkerError> {
    if self.is_disposed() {
      return Err(WorkerError::ChannelClosed);
    }
    let mut outbound = self.inner.outbound.lock();
    match &mut *outbound {
      Outbound::Connected(peer) => peer.send(Frame::Data(payload)),
      Outbound::Pending(queue) => {
        if matches!(self.inner.capacity, Some(cap) if queue.len() >= cap.max(1)) {
          return Err(WorkerError::ResourceLimitReached);
        }
        queue.push_back(payload);
        Ok(())
      }
    }
  }

  /// Sends this messenger's own address to the connected peer, completing
  /// the handshake on the other side.
  pub fn send_handshake(&self) -> Result<(), WorkerError> {
    if self.is_disposed() {
      return Err(WorkerError::ChannelClosed);
    }
    match &*self.inner.outbound.lock() {
      Outbound::Connected(peer) => peer.send(Frame::Handshake(self.inner.address.clone())),
      Outbound::Pending(_) => Err(WorkerError::InvalidState("handshake requires a connected messenger")),
    }
  }

  /// Starts the delivery loop on the current tokio runtime.
  ///
  /// A `Handshake` frame arriving while disconnected connects the messenger
  /// instead of reaching `on_data`. Can be called once per messenger.
  pub fn listen(&self, handlers: Handlers<T>) -> Result<(), WorkerError> {
    if self.is_disposed() {
      return Err(WorkerError::ChannelClosed);
    }
    let inbound = self
      .inner
      .inbound
      .lock()
      .take()
      .ok_or(WorkerError::InvalidState("messenger is already listening"))?;
    // The loop only holds a weak reference: once every handle is dropped,
    // the messenger's own address goes with it and the mailbox can close.
    let messenger = Arc::downgrade(&self.inner);
    let control = self.inner.control.clone();
    tokio::spawn(run_delivery_loop(messenger, control, inbound, handlers));
    Ok(())
  }

  /// Closes the inbound mailbox and stops the delivery loop.
  ///
  /// Frames still in flight are dropped. The peer's sends start failing with
  /// `ChannelClosed`. Calling this more than once has no further effect.
  pub fn dispose(&self) {
    if self.inner.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.inner.address.close();
    self.inner.control.stop.stop(KillPriority::Immediate);
    self.inner.inbound.lock().take();
    if let Outbound::Pending(queue) = &mut *self.inner.outbound.lock() {
      queue.clear();
    }
    tracing::debug!(endpoint_id = self.inner.address.id(), "Messenger disposed");
  }
}

async fn run_delivery_loop<T: Send + 'static>(
  messenger: Weak<MessengerInner<T>>,
  control: ExecutionControl,
  inbound: Inbound<T>,
  mut handlers: Handlers<T>,
) {
  let endpoint_id = inbound.id();
  tracing::trace!(endpoint_id, "Delivery loop started");

  let mut held: Option<Frame<T>> = None;
  loop {
    let next = tokio::select! {
      biased;
      _ = control.stop.stopped() => None,
      frame = async {
        if held.is_none() {
          control.gate.wait_open().await;
          held = Some(inbound.recv().await?);
        }
        // A frame taken just as the gate closed waits for resume.
        control.gate.wait_open().await;
        held.take()
      } => frame,
    };
    match next {
      Some(_) if is_disposed(&messenger) => break,
      Some(frame) => dispatch(&messenger, frame, &mut handlers),
      None => {
        if control.stop.is_stopped() && control.stop.drains() && !is_disposed(&messenger) {
          let mut drained = 0usize;
          if let Some(frame) = held.take() {
            dispatch(&messenger, frame, &mut handlers);
            drained += 1;
          }
          while let Some(frame) = inbound.try_recv() {
            dispatch(&messenger, frame, &mut handlers);
            drained += 1;
          }
          tracing::debug!(endpoint_id, drained, "Drained queued frames before stopping");
        }
        break;
      }
    }
  }

  inbound.close();
  tracing::trace!(endpoint_id, "Delivery loop finished");
  if let Some(on_done) = handlers.on_done.take() {
    on_done();
  }
}

/// A messenger whose handles were all dropped is not disposed; its loop runs
/// until the last peer drops its address.
fn is_disposed<T>(messenger: &Weak<MessengerInner<T>>) -> bool {
  messenger
    .upgrade()
    .map_or(false, |inner| inner.disposed.load(Ordering::Acquire))
}

fn dispatch<T: Send + 'static>(messenger: &Weak<MessengerInner<T>>, frame: Frame<T>, handlers: &mut Handlers<T>) {
  match frame {
    Frame::Data(payload) => (handlers.on_data)(payload),
    Frame::Handshake(peer) => {
      let peer_id = peer.id();
      let Some(inner) = messenger.upgrade() else {
        tracing::trace!(peer_id, "Handshake for a dropped messenger ignored");
        return;
      };
      let live = Messenger { inner };
      let endpoint_id = live.inner.address.id();
      match live.connect_to(peer) {
        Ok(()) => {
          tracing::trace!(endpoint_id, peer_id, "Handshake completed by peer");
        }
        Err(WorkerError::InvalidState(_)) => {
          tracing::warn!(endpoint_id, peer_id, "Ignoring handshake on an already connected messenger");
          if let Some(on_error) = handlers.on_error.as_mut() {
            on_error(WorkerError::InvalidState("handshake received on a connected messenger"));
          }
        }
        Err(e) => {
          if let Some(on_error) = handlers.on_error.as_mut() {
            on_error(e);
          }
        }
      }
    }
  }
}

impl<T> fmt::Debug for Messenger<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Messenger")
      .field("address", &self.inner.address)
      .field("connected", &*self.inner.connected.borrow())
      .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}
