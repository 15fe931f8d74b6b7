//! Reusable object pools for events and byte buffers.
//!
//! [`Pool`] keeps released instances in a lock-free
//! [`ArrayQueue`](crossbeam::queue::ArrayQueue). `acquire` pops a reclaimed
//! instance or allocates a fresh one, so it never blocks and never runs dry.
//! `release` takes the value by move, resets it and keeps it for reuse when
//! the retain queue has room.
//!
//! # Example
//!
//! ```
//! use relaylog_core::pool::EventPool;
//! use relaylog_core::event::Level;
//!
//! let pool = EventPool::new(128).unwrap();
//! let mut event = pool.acquire();
//! event.level = Level::Warn;
//! event.message.push_str("cache miss");
//! pool.release(event);
//!
//! let reused = pool.acquire();
//! assert!(reused.is_zero());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

use crate::error::ConfigError;
use crate::event::LogEvent;

/// Default number of retained events.
pub const DEFAULT_EVENT_RETAIN: usize = 1024;
/// Default number of retained buffers.
pub const DEFAULT_BUFFER_RETAIN: usize = 256;
/// Initial capacity of a fresh buffer (1 KiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;
/// Buffers that grew past this capacity are dropped instead of pooled (64 KiB).
pub const DEFAULT_BUFFER_MAX_CAPACITY: usize = 64 * 1024;

/// Allocation policy for a pooled type.
///
/// Kept separate from the value so buffers can carry a configured capacity.
pub trait PoolPolicy<T>: Send + Sync {
    /// Allocates a fresh zero-valued instance.
    fn fresh(&self) -> T;

    /// Restores the zero value.
    fn reset(&self, value: &mut T);

    /// Whether the instance is worth keeping after use.
    fn is_reusable(&self, _value: &T) -> bool {
        true
    }
}

/// Policy for [`LogEvent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EventPolicy;

impl PoolPolicy<LogEvent> for EventPolicy {
    fn fresh(&self) -> LogEvent {
        LogEvent::default()
    }

    fn reset(&self, value: &mut LogEvent) {
        value.reset();
    }
}

/// Policy for [`BytesMut`] buffers.
#[derive(Debug, Clone, Copy)]
pub struct BufferPolicy {
    /// Initial capacity of a fresh buffer
    pub initial_capacity: usize,
    /// Largest capacity a released buffer may have and still be pooled
    pub max_capacity: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_BUFFER_CAPACITY,
            max_capacity: DEFAULT_BUFFER_MAX_CAPACITY,
        }
    }
}

impl PoolPolicy<BytesMut> for BufferPolicy {
    fn fresh(&self) -> BytesMut {
        BytesMut::with_capacity(self.initial_capacity)
    }

    fn reset(&self, value: &mut BytesMut) {
        value.clear();
    }

    fn is_reusable(&self, value: &BytesMut) -> bool {
        value.capacity() <= self.max_capacity
    }
}

/// Pool counters.
#[derive(Debug, Default)]
struct PoolCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

/// Point-in-time snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `acquire` calls served from the retain queue
    pub hits: u64,
    /// `acquire` calls that allocated
    pub misses: u64,
    /// `release` calls that kept the instance
    pub returns: u64,
    /// `release` calls that dropped the instance
    pub drops: u64,
}

impl PoolStats {
    /// Hit rate in `0.0..=1.0`; `1.0` before the first acquire.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free pool of reusable values.
pub struct Pool<T, P> {
    queue: ArrayQueue<T>,
    policy: P,
    counters: PoolCounters,
}

/// Pool of [`LogEvent`]s.
pub type EventPool = Pool<LogEvent, EventPolicy>;

/// Pool of byte buffers.
pub type BufferPool = Pool<BytesMut, BufferPolicy>;

impl<T: Send, P: PoolPolicy<T>> Pool<T, P> {
    /// Creates a pool that retains up to `retain` released instances.
    ///
    /// A zero `retain` is rejected: `ArrayQueue` cannot be empty-sized.
    pub fn with_policy(retain: usize, policy: P) -> Result<Self, ConfigError> {
        if retain == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.retain".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(Self {
            queue: ArrayQueue::new(retain),
            policy,
            counters: PoolCounters::default(),
        })
    }

    /// Returns a zero-valued instance, reclaimed or freshly allocated.
    #[inline]
    pub fn acquire(&self) -> T {
        match self.queue.pop() {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.policy.fresh()
            }
        }
    }

    /// Resets `value` and keeps it for a later `acquire`.
    #[inline]
    pub fn release(&self, mut value: T) {
        if !self.policy.is_reusable(&value) {
            self.counters.drops.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.policy.reset(&mut value);
        match self.queue.push(value) {
            Ok(()) => {
                self.counters.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // retain queue full
                self.counters.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of instances waiting for reuse.
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of retained instances.
    pub fn retain_limit(&self) -> usize {
        self.queue.capacity()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            returns: self.counters.returns.load(Ordering::Relaxed),
            drops: self.counters.drops.load(Ordering::Relaxed),
        }
    }
}

impl EventPool {
    /// Creates an event pool retaining up to `retain` events.
    pub fn new(retain: usize) -> Result<Self, ConfigError> {
        Self::with_policy(retain, EventPolicy)
    }
}

impl BufferPool {
    /// Creates a buffer pool.
    ///
    /// Fresh buffers start with `initial_capacity`; released buffers larger
    /// than `max_capacity` are dropped.
    pub fn new(
        retain: usize,
        initial_capacity: usize,
        max_capacity: usize,
    ) -> Result<Self, ConfigError> {
        if max_capacity < initial_capacity {
            return Err(ConfigError::InvalidValue {
                field: "pool.buffer_max_capacity".to_owned(),
                reason: format!("must be at least the initial capacity ({initial_capacity})"),
            });
        }
        Self::with_policy(
            retain,
            BufferPolicy {
                initial_capacity,
                max_capacity,
            },
        )
    }

    /// Buffer pool with default sizes.
    pub fn with_defaults() -> Self {
        Self {
            queue: ArrayQueue::new(DEFAULT_BUFFER_RETAIN),
            policy: BufferPolicy::default(),
            counters: PoolCounters::default(),
        }
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self {
            queue: ArrayQueue::new(DEFAULT_EVENT_RETAIN),
            policy: EventPolicy,
            counters: PoolCounters::default(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}
