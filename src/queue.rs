//! Producer/consumer handoffs between the API, the fetcher, and the worker.
//!
//! One mutex and one condition variable per queue; any thread may produce,
//! exactly one long-lived thread consumes. Items come out in FIFO order.
//! Submission order across URLs is not part of the public contract, but FIFO
//! keeps the per-URL guarantee that a disk-hit item enqueued at `load` time
//! is handled before the revalidation outcome that follows it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

#[derive(Debug)]
pub(crate) struct SignalQueue<T> {
  state: Mutex<QueueState<T>>,
  cv: Condvar,
}

#[derive(Debug)]
struct QueueState<T> {
  items: VecDeque<T>,
  open: bool,
}

impl<T> SignalQueue<T> {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(QueueState {
        items: VecDeque::new(),
        open: true,
      }),
      cv: Condvar::new(),
    }
  }

  /// Enqueues an item and wakes the consumer. Dropped once the queue has
  /// been closed.
  pub(crate) fn push(&self, item: T) {
    let mut state = self.state.lock().unwrap();
    if !state.open {
      return;
    }
    state.items.push_back(item);
    self.cv.notify_one();
  }

  pub(crate) fn try_pop(&self) -> Option<T> {
    self.state.lock().unwrap().items.pop_front()
  }

  /// Blocks until an item is available. Returns `false` once the queue has
  /// been closed, at which point the consumer should re-check its running
  /// flag rather than pop.
  pub(crate) fn wait_nonempty(&self) -> bool {
    let mut state = self.state.lock().unwrap();
    while state.items.is_empty() && state.open {
      state = self.cv.wait(state).unwrap();
    }
    state.open && !state.items.is_empty()
  }

  /// Blocks until at least one item is queued, then takes the whole pending
  /// list in one lock acquisition. Returns `None` once the queue is closed
  /// and drained.
  pub(crate) fn wait_batch(&self) -> Option<VecDeque<T>> {
    let mut state = self.state.lock().unwrap();
    loop {
      if !state.items.is_empty() {
        return Some(std::mem::take(&mut state.items));
      }
      if !state.open {
        return None;
      }
      state = self.cv.wait(state).unwrap();
    }
  }

  /// Closes the queue and wakes every waiter. Anything still pending stays
  /// queued and is dropped with the queue unless the consumer drains it.
  pub(crate) fn close(&self) {
    let mut state = self.state.lock().unwrap();
    state.open = false;
    self.cv.notify_all();
  }

  /// Closes the queue and discards anything still pending, so a consumer
  /// blocked in [`wait_batch`](Self::wait_batch) wakes to `None` instead of
  /// a final batch.
  pub(crate) fn close_and_discard(&self) {
    let mut state = self.state.lock().unwrap();
    state.open = false;
    state.items.clear();
    self.cv.notify_all();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn items_come_out_in_fifo_order() {
    let queue = SignalQueue::new();
    queue.push(1);
    queue.push(2);
    queue.push(3);
    assert_eq!(queue.try_pop(), Some(1));
    assert_eq!(queue.try_pop(), Some(2));
    assert_eq!(queue.try_pop(), Some(3));
    assert_eq!(queue.try_pop(), None);
  }

  #[test]
  fn wait_batch_takes_everything_pending() {
    let queue = SignalQueue::new();
    queue.push("a");
    queue.push("b");
    let batch = queue.wait_batch().expect("open queue with items");
    assert_eq!(batch.len(), 2);
    assert_eq!(queue.try_pop(), None);
  }

  #[test]
  fn close_wakes_a_blocked_consumer() {
    let queue: Arc<SignalQueue<u32>> = Arc::new(SignalQueue::new());
    let consumer = {
      let queue = Arc::clone(&queue);
      thread::spawn(move || queue.wait_batch())
    };
    thread::sleep(Duration::from_millis(50));
    queue.close();
    assert_eq!(consumer.join().expect("consumer"), None);
  }

  #[test]
  fn push_after_close_is_dropped() {
    let queue = SignalQueue::new();
    queue.close();
    queue.push(1);
    assert_eq!(queue.try_pop(), None);
    assert!(!queue.wait_nonempty());
  }

  #[test]
  fn close_keeps_pending_items_poppable() {
    let queue = SignalQueue::new();
    queue.push(1);
    queue.close();
    assert_eq!(queue.try_pop(), Some(1));
    assert!(!queue.wait_nonempty());
  }

  #[test]
  fn close_and_discard_drops_pending_items() {
    let queue = SignalQueue::new();
    queue.push(1);
    queue.push(2);
    queue.close_and_discard();
    assert_eq!(queue.wait_batch(), None);
    assert_eq!(queue.try_pop(), None);
  }

  #[test]
  fn producer_wakes_a_waiting_consumer() {
    let queue: Arc<SignalQueue<u32>> = Arc::new(SignalQueue::new());
    let consumer = {
      let queue = Arc::clone(&queue);
      thread::spawn(move || {
        assert!(queue.wait_nonempty());
        queue.try_pop()
      })
    };
    thread::sleep(Duration::from_millis(50));
    queue.push(7);
    assert_eq!(consumer.join().expect("consumer"), Some(7));
  }
}
