// src/runtime/mailbox.rs

//! One-directional FIFO mailboxes based on `async-channel`.
//!
//! A mailbox is split into an [`Endpoint`] (the transferable address, which
//! grants send rights only) and an [`Inbound`] (the single consuming end).
//! Every frame enqueued on an endpoint is delivered in order to whoever owns
//! the inbound end, or dropped if the mailbox is closed first.

use crate::error::WorkerError;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of process-unique endpoint ids. Ids only serve logging and equality.
static NEXT_ENDPOINT_ID: AtomicUsize = AtomicUsize::new(1);

/// Everything that travels over a mailbox.
///
/// The discriminant tells the receiver whether it is looking at the peer's
/// return address or at user data, so no payload ever has to be inspected
/// to find the handshake.
#[derive(Debug)]
pub enum Frame<T> {
  /// The sender's own inbound address, sent once to complete the handshake.
  Handshake(Endpoint<T>),
  /// An ordinary user payload.
  Data(T),
}

impl<T> Frame<T> {
  pub fn variant_name(&self) -> &'static str {
    match self {
      Frame::Handshake(_) => "Handshake",
      Frame::Data(_) => "Data",
    }
  }
}

/// The sending half of a mailbox: an opaque address that can be cloned and
/// carried inside a [`Frame`] to another execution context.
pub struct Endpoint<T> {
  id: usize,
  tx: async_channel::Sender<Frame<T>>,
}

impl<T> Endpoint<T> {
  /// Process-unique id of the mailbox this endpoint addresses.
  pub fn id(&self) -> usize {
    self.id
  }

  /// Enqueues a frame without waiting.
  ///
  /// Fails with `ChannelClosed` once the mailbox has been closed and with
  /// `ResourceLimitReached` when a bounded mailbox is full.
  pub fn send(&self, frame: Frame<T>) -> Result<(), WorkerError> {
    self.tx.try_send(frame).map_err(WorkerError::from)
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  /// Closes the mailbox. Returns `true` if this call closed it.
  pub(crate) fn close(&self) -> bool {
    self.tx.close()
  }
}

impl<T> Clone for Endpoint<T> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      tx: self.tx.clone(),
    }
  }
}

impl<T> PartialEq for Endpoint<T> {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl<T> Eq for Endpoint<T> {}

impl<T> fmt::Debug for Endpoint<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Endpoint")
      .field("id", &self.id)
      .field("closed", &self.tx.is_closed())
      .finish()
  }
}

/// The receiving half of a mailbox. Only one task should own it.
pub struct Inbound<T> {
  id: usize,
  rx: async_channel::Receiver<Frame<T>>,
}

impl<T> Inbound<T> {
  pub fn id(&self) -> usize {
    self.id
  }

  /// Waits for the next frame. `None` once the mailbox is closed and drained.
  pub async fn recv(&self) -> Option<Frame<T>> {
    self.rx.recv().await.ok()
  }

  /// Takes the next frame if one is already queued.
  pub fn try_recv(&self) -> Option<Frame<T>> {
    self.rx.try_recv().ok()
  }

  /// Number of frames currently queued.
  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }

  pub fn close(&self) -> bool {
    self.rx.close()
  }
}

impl<T> fmt::Debug for Inbound<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Inbound")
      .field("id", &self.id)
      .field("queued", &self.rx.len())
      .finish()
  }
}

/// Creates a new mailbox.
///
/// `None` gives an unbounded mailbox. `Some(capacity)` gives a bounded one
/// (capacity is clamped to at least 1) whose sends fail instead of waiting
/// when full.
pub fn mailbox<T>(capacity: Option<usize>) -> (Endpoint<T>, Inbound<T>) {
  let (tx, rx) = match capacity {
    Some(capacity) => async_channel::bounded(capacity.max(1)),
    None => async_channel::unbounded(),
  };
  let id = NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed);
  tracing::trace!(endpoint_id = id, ?capacity, "Created mailbox");
  (Endpoint { id, tx }, Inbound { id, rx })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn frames_arrive_in_send_order() {
    let (endpoint, inbound) = mailbox::<u32>(None);
    for i in 0..5 {
      endpoint.send(Frame::Data(i)).unwrap();
    }
    for expected in 0..5 {
      match inbound.recv().await {
        Some(Frame::Data(v)) => assert_eq!(v, expected),
        other => panic!("unexpected frame: {:?}", other),
      }
    }
    assert!(inbound.is_empty());
  }

  #[tokio::test]
  async fn closed_mailbox_rejects_sends() {
    let (endpoint, inbound) = mailbox::<u32>(None);
    assert!(inbound.close());
    assert!(!endpoint.close(), "second close is a no-op");
    assert_eq!(endpoint.send(Frame::Data(1)), Err(WorkerError::ChannelClosed));
    assert!(inbound.recv().await.is_none());
  }

  #[test]
  fn bounded_mailbox_reports_full() {
    let (endpoint, _inbound) = mailbox::<u32>(Some(1));
    endpoint.send(Frame::Data(1)).unwrap();
    assert_eq!(endpoint.send(Frame::Data(2)), Err(WorkerError::ResourceLimitReached));
  }

  #[test]
  fn endpoints_travel_inside_frames() {
    let (a, inbound_a) = mailbox::<u32>(None);
    let (b, _inbound_b) = mailbox::<u32>(None);
    assert_ne!(a, b);
    a.send(Frame::Handshake(b.clone())).unwrap();
    match inbound_a.try_recv() {
      Some(Frame::Handshake(addr)) => assert_eq!(addr, b),
      other => panic!("expected handshake, got {:?}", other.map(|f| f.variant_name())),
    }
  }
}
