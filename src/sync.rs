//! Synchronization primitives, swappable for loom model checking.
//!
//! Production code uses `parking_lot`; under `RUSTFLAGS="--cfg loom"` the same
//! names resolve to `loom::sync`. Code that locks goes through [`lock`] so the
//! two `lock()` signatures do not leak into callers.
//!
//! Loom tests live in the standalone `loom-tests/` crate:
//! ```bash
//! cd loom-tests
//! RUSTFLAGS="--cfg loom" cargo test --release
//! ```

#[cfg(loom)]
pub(crate) mod inner {
    pub use loom::sync::Arc;
    pub use loom::sync::Mutex;
    pub use loom::sync::MutexGuard;

    /// Locks `mutex`. A poisoned lock still yields its data.
    pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(not(loom))]
pub(crate) mod inner {
    pub use parking_lot::Mutex;
    pub use parking_lot::MutexGuard;
    pub use std::sync::Arc;

    /// Locks `mutex`.
    #[inline]
    pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock()
    }
}

pub(crate) use inner::*;

#[cfg(all(test, not(loom)))]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn lock_gives_exclusive_access() {
        let shared = Arc::new(Mutex::new(Vec::new()));
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let shared = shared.clone();
                std::thread::spawn(move || lock(&shared).push(n))
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        let mut seen = lock(&shared).clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
