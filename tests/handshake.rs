// tests/handshake.rs

use workline::{Handlers, SpawnOptions, WorkerContext, WorkerError};
mod common;

use common::{LONG_TIMEOUT, SHORT_TIMEOUT};
use std::time::Duration;

#[tokio::test]
async fn test_on_initialized_fires_once_and_both_directions_work() -> Result<(), WorkerError> {
  let mut registry = common::test_registry::<u32>();
  let (on_receive, received) = common::collector();
  let (init_tx, init_rx) = async_channel::unbounded();

  let handle = registry.spawn(
    common::echo_plus_one,
    SpawnOptions::new()
      .name("echo")
      .on_receive(on_receive)
      .on_initialized(move || {
        let _ = init_tx.try_send(());
      }),
  )?;

  common::recv_timeout(&init_rx, LONG_TIMEOUT).await?;
  assert!(handle.is_initialized());
  handle.wait_initialized(Some(SHORT_TIMEOUT)).await?;

  registry.send(41, "echo")?;
  assert_eq!(common::recv_timeout(&received, LONG_TIMEOUT).await?, 42);
  registry.send(1, &handle)?;
  assert_eq!(common::recv_timeout(&received, LONG_TIMEOUT).await?, 2);

  common::assert_silent(&init_rx, SHORT_TIMEOUT).await;
  registry.term().await
}

#[tokio::test]
async fn test_sends_before_handshake_are_delivered_in_order() -> Result<(), WorkerError> {
  let mut registry = common::test_registry::<u32>();
  let (on_receive, received) = common::collector();
  let (release_tx, release_rx) = async_channel::bounded::<()>(1);

  registry.spawn(
    move |ctx: WorkerContext<u32>| async move {
      // Hold the handshake back until the parent has queued its sends.
      let _ = release_rx.recv().await;
      common::echo_plus_one(ctx).await;
    },
    SpawnOptions::new().name("late").on_receive(on_receive),
  )?;

  for n in [1, 2, 3] {
    registry.send(n, "late")?;
  }
  assert!(!registry.get("late").unwrap().is_initialized());
  release_tx.send(()).await.unwrap();

  for expected in [2, 3, 4] {
    assert_eq!(common::recv_timeout(&received, LONG_TIMEOUT).await?, expected);
  }
  registry.term().await
}

#[tokio::test]
async fn test_worker_can_send_first() -> Result<(), WorkerError> {
  let mut registry = common::test_registry::<String>();
  let (on_receive, received) = common::collector();

  registry.spawn(
    |mut ctx: WorkerContext<String>| async move {
      let messenger = ctx.initialize().expect("initialize failed");
      messenger.send(format!("hello from {}", ctx.name())).unwrap();
    },
    SpawnOptions::new().name("greeter").on_receive(on_receive),
  )?;

  assert_eq!(
    common::recv_timeout(&received, LONG_TIMEOUT).await?,
    "hello from greeter"
  );
  registry.term().await
}

#[tokio::test]
async fn test_uninitialized_worker_times_out_and_can_be_killed() -> Result<(), WorkerError> {
  let mut registry = common::test_registry::<u32>();
  let handle = registry.spawn(
    |ctx: WorkerContext<u32>| async move {
      // Never initializes; just waits to be killed.
      ctx.stopped().await;
    },
    SpawnOptions::new().name("silent"),
  )?;

  assert_eq!(
    handle.wait_initialized(Some(Duration::from_millis(100))).await,
    Err(WorkerError::HandshakeTimeout)
  );
  assert!(!handle.is_initialized());

  assert!(registry.kill("silent", workline::KillPriority::Immediate));
  assert_eq!(
    handle.wait_initialized(Some(SHORT_TIMEOUT)).await,
    Err(WorkerError::ChannelClosed)
  );
  registry.term().await
}

#[tokio::test]
async fn test_initialize_twice_is_rejected() -> Result<(), WorkerError> {
  let mut registry = common::test_registry::<u32>();
  let (result_tx, result_rx) = async_channel::bounded(1);

  registry.spawn(
    move |mut ctx: WorkerContext<u32>| async move {
      let messenger = ctx.initialize().expect("first initialize failed");
      let _ = result_tx.try_send(ctx.initialize().map(|_| ()));
      messenger.listen(Handlers::new(|_| {})).unwrap();
    },
    SpawnOptions::new(),
  )?;

  assert_eq!(
    common::recv_timeout(&result_rx, LONG_TIMEOUT).await?,
    Err(WorkerError::InvalidState("worker already initialized"))
  );
  registry.term().await
}
