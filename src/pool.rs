use crate::codec::GzipEncoder;
use crate::config::Level;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of idle encoders kept around between requests.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// A pool of reusable gzip encoders, shared by every request of a handler.
///
/// Encoders are created on demand at the pool's level. Returned encoders are
/// kept for the next lease until `max_idle` is reached; anything beyond that
/// is dropped.
#[derive(Debug)]
pub struct EncoderPool {
    level: Level,
    max_idle: usize,
    idle: Mutex<Vec<GzipEncoder>>,
    created: AtomicUsize,
}

impl EncoderPool {
    /// Creates an empty pool producing encoders at `level`.
    pub fn new(level: Level) -> Self {
        Self::with_max_idle(level, DEFAULT_MAX_IDLE)
    }

    /// Creates an empty pool that keeps at most `max_idle` idle encoders.
    pub fn with_max_idle(level: Level, max_idle: usize) -> Self {
        Self {
            level,
            max_idle,
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Takes an idle encoder, or builds a new one if none is available.
    ///
    /// The encoder goes back to the pool when the returned guard is dropped,
    /// including while unwinding.
    pub fn lease(self: &Arc<Self>) -> PooledEncoder {
        let reused = self.idle.lock().pop();
        let encoder = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(level = self.level.get(), "allocating gzip encoder");
            GzipEncoder::new(self.level)
        });

        PooledEncoder {
            encoder: Some(encoder),
            pool: Arc::clone(self),
        }
    }

    /// Returns the level of encoders produced by this pool.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Number of encoders currently waiting in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of encoders this pool has ever allocated.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn release(&self, encoder: GzipEncoder) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(encoder);
        }
    }
}

/// Exclusive lease on a pooled [`GzipEncoder`].
#[derive(Debug)]
pub struct PooledEncoder {
    encoder: Option<GzipEncoder>,
    pool: Arc<EncoderPool>,
}

impl Deref for PooledEncoder {
    type Target = GzipEncoder;

    fn deref(&self) -> &GzipEncoder {
        // Only `Drop` takes the encoder out.
        self.encoder.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledEncoder {
    fn deref_mut(&mut self) -> &mut GzipEncoder {
        self.encoder.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledEncoder {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.pool.release(encoder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn test_lease_creates_lazily() {
        let pool = Arc::new(EncoderPool::new(Level::BEST));
        assert_eq!(pool.created(), 0);

        let encoder = pool.lease();
        assert_eq!(encoder.level(), Level::BEST);
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle(), 0);

        drop(encoder);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_lease_reuses_returned_encoder() {
        let pool = Arc::new(EncoderPool::new(Level::DEFAULT));

        drop(pool.lease());
        drop(pool.lease());
        drop(pool.lease());

        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_concurrent_leases_get_distinct_encoders() {
        let pool = Arc::new(EncoderPool::new(Level::DEFAULT));

        let first = pool.lease();
        let second = pool.lease();
        assert_eq!(pool.created(), 2);

        drop(first);
        drop(second);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_max_idle_drops_surplus() {
        let pool = Arc::new(EncoderPool::with_max_idle(Level::DEFAULT, 1));

        let leases: Vec<_> = (0..3).map(|_| pool.lease()).collect();
        drop(leases);

        assert_eq!(pool.created(), 3);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_returned_on_panic() {
        let pool = Arc::new(EncoderPool::new(Level::DEFAULT));

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _encoder = pool.lease();
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_pool_is_shared_across_threads() {
        let pool = Arc::new(EncoderPool::new(Level::FASTEST));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let mut encoder = pool.lease();
                        encoder.reset();
                        let mut out = Vec::new();
                        encoder.write(b"payload", &mut out).unwrap();
                        encoder.close(&mut out).unwrap();
                    }
                });
            }
        });

        assert!(pool.created() <= 8);
        assert_eq!(pool.idle(), pool.created());
    }
}
