//! Bounded sink with fail-fast backpressure
//!
//! Wraps a bounded `mpsc` sender so producers can choose between an
//! immediate accept/reject ([`BoundedSink::try_write`]) and a deferred write
//! ([`BoundedSink::write`]) that completes when the consumer frees capacity.
//! The deferred write is the drain resume: the channel's FIFO permit queue
//! wakes exactly one waiter per freed slot, ahead of any `try_write` issued
//! after the slot freed, so a stalled producer observes its deferred item
//! land before newer traffic.

use tokio::sync::mpsc::{self, error::TrySendError};

/// Create a sink/receiver pair with the given capacity.
pub fn bounded<T>(capacity: usize) -> (BoundedSink<T>, mpsc::Receiver<T>) {
  let (tx, rx) = mpsc::channel(capacity.max(1));
  (BoundedSink { tx }, rx)
}

/// Write rejected without blocking.
#[derive(Debug, thiserror::Error)]
pub enum WriteError<T> {
  /// Queue is at capacity; the item is handed back so the producer can arm
  /// a deferred [`BoundedSink::write`] with it
  #[error("queue is at capacity")]
  Full(T),
  /// Receiver dropped; no write will ever be accepted again
  #[error("consumer is gone")]
  Closed(T),
}

/// Consumer dropped while a deferred write was pending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("consumer is gone")]
pub struct SinkClosed;

/// Cloneable producer side of a bounded queue.
#[derive(Debug)]
pub struct BoundedSink<T> {
  tx: mpsc::Sender<T>,
}

impl<T> Clone for BoundedSink<T> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<T> BoundedSink<T> {
  /// Attempt a write without waiting. Accepted iff the queue is below
  /// capacity; otherwise the item comes back in the error.
  pub fn try_write(&self, item: T) -> Result<(), WriteError<T>> {
    self.tx.try_send(item).map_err(|e| match e {
      TrySendError::Full(item) => WriteError::Full(item),
      TrySendError::Closed(item) => WriteError::Closed(item),
    })
  }

  /// Write, waiting for capacity if necessary. Resolves exactly once, when
  /// the queue transitions below capacity (or immediately if it already is).
  pub async fn write(&self, item: T) -> Result<(), SinkClosed> {
    self.tx.send(item).await.map_err(|_| SinkClosed)
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
  };

  use super::*;

  #[tokio::test]
  async fn rejects_writes_over_capacity() {
    let (sink, _rx) = bounded::<u32>(2);
    let mut rejected = Vec::new();
    for i in 0..5 {
      if let Err(WriteError::Full(item)) = sink.try_write(i) {
        rejected.push(item);
      }
    }
    // capacity 2 of 5: exactly 3 rejections, items handed back intact
    assert_eq!(rejected, vec![2, 3, 4]);
  }

  #[tokio::test]
  async fn each_freed_slot_resumes_exactly_one_deferred_write() {
    let (sink, mut rx) = bounded::<u32>(1);
    sink.try_write(0).unwrap();

    let resumed = Arc::new(AtomicUsize::new(0));
    for i in 1..=2 {
      let sink = sink.clone();
      let resumed = resumed.clone();
      tokio::spawn(async move {
        sink.write(i).await.unwrap();
        resumed.fetch_add(1, Ordering::SeqCst);
      });
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(resumed.load(Ordering::SeqCst), 0);

    assert_eq!(rx.recv().await, Some(0));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(resumed.load(Ordering::SeqCst), 1);

    rx.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(resumed.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn deferred_write_lands_before_later_try_writes() {
    let (sink, mut rx) = bounded::<u32>(1);
    sink.try_write(1).unwrap();

    let deferred = {
      let sink = sink.clone();
      tokio::spawn(async move { sink.write(2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(rx.recv().await, Some(1));
    deferred.await.unwrap().unwrap();

    // the freed slot went to the deferred write, not to new traffic
    assert!(matches!(sink.try_write(9), Err(WriteError::Full(9))));
    assert_eq!(rx.recv().await, Some(2));
  }

  #[tokio::test]
  async fn writes_after_receiver_drop_report_closed() {
    let (sink, rx) = bounded::<u32>(1);
    drop(rx);
    assert!(matches!(sink.try_write(1), Err(WriteError::Closed(1))));
    assert_eq!(sink.write(2).await, Err(SinkClosed));
  }
}
