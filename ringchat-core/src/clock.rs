use std::sync::Mutex;

/// A Lamport-style logical clock shared by every connection on a peer.
///
/// Every outbound message advances it; every inbound message folds the
/// remote's timestamp in via `update`. Both operations return the value
/// read under the lock, so callers observe a monotonically non-decreasing
/// sequence even under concurrent access from multiple connection tasks.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: Mutex<u64>,
}

impl LogicalClock {
    pub fn new() -> LogicalClock {
        LogicalClock {
            counter: Mutex::new(0),
        }
    }

    pub fn advance(&self) -> u64 {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        *counter
    }

    pub fn update(&self, remote: u64) -> u64 {
        let mut counter = self.counter.lock().unwrap();
        *counter = std::cmp::max(*counter, remote) + 1;
        *counter
    }

    pub fn read(&self) -> u64 {
        *self.counter.lock().unwrap()
    }

    pub fn reset(&self) {
        *self.counter.lock().unwrap() = 0;
    }
}
