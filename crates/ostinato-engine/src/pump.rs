//! Single-slot snapshot channel from the audio thread to a consumer
//!
//! The audio thread pushes one snapshot per block; a dedicated consumer
//! thread hands the latest value to a user callback. The slot overwrites:
//! if the consumer is behind, intermediate snapshots are silently dropped.
//! `push` is a slot store plus an unpark - no allocation, no blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::atomic::AtomicCell;

struct PumpShared<T> {
    slot: AtomicCell<Option<T>>,
    stop: AtomicBool,
}

/// Coalescing snapshot channel with an owned consumer thread
pub struct Pump<T: Copy + Send + 'static> {
    shared: Arc<PumpShared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Copy + Send + 'static> Pump<T> {
    /// Spawn the consumer thread. `callback` runs on that thread for every
    /// snapshot it manages to observe.
    pub fn new(name: &str, callback: impl Fn(T) + Send + 'static) -> Self {
        let shared = Arc::new(PumpShared {
            slot: AtomicCell::new(None),
            stop: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || loop {
                if worker_shared.stop.load(Ordering::Acquire) {
                    break;
                }
                match worker_shared.slot.take() {
                    Some(value) => callback(value),
                    None => std::thread::park(),
                }
            })
            .expect("failed to spawn pump consumer thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Publish a snapshot, overwriting whatever the consumer has not taken
    pub fn push(&self, value: T) {
        self.shared.slot.store(Some(value));
        if let Some(worker) = &self.worker {
            worker.thread().unpark();
        }
    }

    /// Signal the consumer and join it
    pub fn cleanup(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
    }
}

impl<T: Copy + Send + 'static> Drop for Pump<T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_delivers_latest_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let mut pump = Pump::new("test-pump", move |v: u64| {
            seen2.lock().unwrap().push(v);
        });

        pump.push(1);
        pump.push(2);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().last() != Some(&2) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        pump.cleanup();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen.last().unwrap(), 2);
    }

    #[test]
    fn test_burst_coalesces() {
        let count = Arc::new(AtomicU64::new(0));
        let last = Arc::new(AtomicU64::new(0));
        let (count2, last2) = (Arc::clone(&count), Arc::clone(&last));
        let mut pump = Pump::new("test-pump", move |v: u64| {
            count2.fetch_add(1, Ordering::SeqCst);
            last2.store(v, Ordering::SeqCst);
            // slow consumer
            std::thread::sleep(Duration::from_millis(5));
        });

        for i in 0..100 {
            pump.push(i);
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while last.load(Ordering::SeqCst) != 99 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        pump.cleanup();

        // far fewer callbacks than pushes, and the final value was seen
        assert!(count.load(Ordering::SeqCst) < 100);
        assert_eq!(last.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut pump = Pump::new("test-pump", |_: u64| {});
        pump.push(1);
        pump.cleanup();
        pump.cleanup();
    }
}
