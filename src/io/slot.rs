// src/io/slot.rs
//
// Single-capacity hand-off cell between the reader thread and consumers.
//
// `publish` overwrites whatever is held and never blocks. `consume` removes the
// value it returns, so any given published value is seen by at most one
// consumer. This is not a broadcast cache.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct LatestValueSlot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Default for LatestValueSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestValueSlot<T> {
    pub fn new() -> Self {
        LatestValueSlot {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    // A panicking holder cannot leave the Option half-written, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any held value with `value` and wake one waiting consumer.
    pub fn publish(&self, value: T) {
        {
            let mut guard = self.lock();
            *guard = Some(value);
        }
        self.ready.notify_one();
    }

    /// Take the held value, waiting up to `timeout` for a publish if empty.
    /// Returns `None` when the deadline passes with nothing published.
    pub fn consume(&self, timeout: Duration) -> Option<T> {
        let guard = self.lock();
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_publish_overwrites_pending_value() {
        let slot = LatestValueSlot::new();
        slot.publish("A");
        slot.publish("B");
        assert_eq!(slot.consume(Duration::from_millis(10)), Some("B"));
        assert_eq!(slot.consume(Duration::ZERO), None);
    }

    #[test]
    fn test_consume_is_destructive() {
        let slot = LatestValueSlot::new();
        slot.publish(1);
        assert_eq!(slot.consume(Duration::ZERO), Some(1));
        assert_eq!(slot.consume(Duration::ZERO), None);
    }

    #[test]
    fn test_consume_empty_waits_for_timeout() {
        let slot: LatestValueSlot<u32> = LatestValueSlot::new();
        let timeout = Duration::from_millis(100);
        let start = Instant::now();
        assert_eq!(slot.consume(timeout), None);
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
        assert!(elapsed < timeout * 10, "waited too long: {:?}", elapsed);
    }

    #[test]
    fn test_consume_wakes_on_publish() {
        let slot = Arc::new(LatestValueSlot::new());
        let publisher = {
            let slot = slot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                slot.publish(7u32);
            })
        };
        let start = Instant::now();
        assert_eq!(slot.consume(Duration::from_secs(5)), Some(7));
        assert!(start.elapsed() < Duration::from_secs(5));
        publisher.join().unwrap();
    }

    #[test]
    fn test_racing_consumers_see_value_at_most_once() {
        for _ in 0..20 {
            let slot = Arc::new(LatestValueSlot::new());
            let consumers: Vec<_> = (0..2)
                .map(|_| {
                    let slot = slot.clone();
                    thread::spawn(move || slot.consume(Duration::from_millis(100)))
                })
                .collect();
            slot.publish(99u32);
            let seen: Vec<u32> = consumers
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();
            assert_eq!(seen, vec![99]);
        }
    }

    #[test]
    fn test_publish_never_blocks_without_consumer() {
        let slot = LatestValueSlot::new();
        let start = Instant::now();
        for i in 0..10_000u32 {
            slot.publish(i);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(slot.consume(Duration::ZERO), Some(9_999));
    }
}
