use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Blocking counting semaphore bounding the number of chunks in flight.
pub(crate) struct ChunkThrottle {
    permits: Mutex<usize>,
    cv: Condvar,
}

/// Held while a chunk runs; returns its permit on drop.
pub(crate) struct Permit<'a> {
    throttle: &'a ChunkThrottle,
    /// Time spent blocked before the permit was granted.
    pub(crate) waited: Duration,
}

impl ChunkThrottle {
    /// `permits` must be non-zero; the engine validates this before building one.
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits.max(1)),
            cv: Condvar::new(),
        }
    }

    /// Block until a permit is available.
    pub(crate) fn acquire(&self) -> Permit<'_> {
        let start = Instant::now();
        let mut blocked = false;
        let mut free = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        while *free == 0 {
            blocked = true;
            free = self.cv.wait(free).unwrap_or_else(PoisonError::into_inner);
        }
        *free -= 1;
        Permit {
            throttle: self,
            waited: if blocked { start.elapsed() } else { Duration::ZERO },
        }
    }

    fn release(&self) {
        let mut free = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *free += 1;
        self.cv.notify_one();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.throttle.release();
    }
}
