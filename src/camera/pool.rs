use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::frame::Frame;

struct PoolInner {
    capacity: usize,
    free: Mutex<usize>,
    returned: Condvar,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed set of camera buffer slots.
///
/// Each delivered frame holds one slot until it is released. When the consumer
/// sits on every slot the producer cannot capture: `acquire` waits and then
/// reports a stall.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("buffer pool needs at least one slot");
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                capacity,
                free: Mutex::new(capacity),
                returned: Condvar::new(),
            }),
        })
    }

    /// Slots not currently held by a frame.
    pub fn available(&self) -> usize {
        *self.inner.lock()
    }

    /// Take a slot, waiting up to `timeout` for one to be released.
    pub fn acquire(&self, timeout: Duration) -> Result<PoolSlot> {
        let deadline = Instant::now() + timeout;
        let mut free = self.inner.lock();
        while *free == 0 {
            let now = Instant::now();
            if now >= deadline {
                bail!(
                    "camera stalled: all {} buffers are held by the consumer",
                    self.inner.capacity
                );
            }
            free = self
                .inner
                .returned
                .wait_timeout(free, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        *free -= 1;
        Ok(PoolSlot {
            inner: self.inner.clone(),
        })
    }
}

/// One held buffer slot. Returned to the pool on drop.
pub struct PoolSlot {
    inner: Arc<PoolInner>,
}

impl PoolSlot {
    /// Tie this slot to `frame`: releasing the frame returns the slot.
    pub fn attach(self, frame: Frame) -> Frame {
        frame.with_release_hook(move |_| drop(self))
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        {
            let mut free = self.inner.lock();
            *free += 1;
            debug_assert!(*free <= self.inner.capacity, "buffer slot returned twice");
        }
        self.inner.returned.notify_one();
    }
}
