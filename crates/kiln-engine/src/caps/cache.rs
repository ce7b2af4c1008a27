use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use state::InitCell;

use crate::native::NativeError;

use super::{Capabilities, CapsError};

type CapsResult = Result<Arc<Capabilities>, CapsError>;

/// One-shot holder for an adapter's capability snapshot, together with the
/// init mutex that serializes its computation.
///
/// Readers take no lock once the snapshot exists. Filling the cache is only
/// possible through an [`InitGuard`] of this very cache, so the computation
/// always runs with the owner's init mutex held.
pub struct CapsCache<T> {
    cell: InitCell<CapsResult>,
    init: Mutex<T>,
}

/// Evidence that the init mutex of one particular [`CapsCache`] is held.
///
/// Dereferences to the state guarded by that mutex.
pub struct InitGuard<'a, T> {
    cache: &'a CapsCache<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> CapsCache<T> {
    pub fn new(init: T) -> Self {
        Self { cell: InitCell::new(), init: Mutex::new(init) }
    }

    /// Acquires the init mutex.
    pub fn lock(&self) -> InitGuard<'_, T> {
        InitGuard {
            cache: self,
            guard: self.init.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Direct access to the guarded state when no other reference exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.init.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a snapshot has been computed successfully.
    pub fn is_valid(&self) -> bool {
        matches!(self.cell.try_get(), Some(Ok(_)))
    }

    /// Lock-free read of the recorded outcome, if any.
    pub fn get(&self) -> Option<CapsResult> {
        self.cell.try_get().cloned()
    }
}

impl<T> InitGuard<'_, T> {
    /// Returns the cached outcome, running `compute` if nothing is recorded yet.
    ///
    /// `compute` runs at most once per cache: callers serialize on the init
    /// mutex and the second one observes the first one's result.
    pub fn get_or_compute<F>(&self, compute: F) -> CapsResult
    where
        F: FnOnce() -> Result<Capabilities, NativeError>,
    {
        let cell = &self.cache.cell;
        if let Some(recorded) = cell.try_get() {
            return recorded.clone();
        }

        let outcome = match compute() {
            Ok(caps) => {
                log::debug!("capabilities cached for '{}'", caps.name);
                Ok(Arc::new(caps))
            }
            Err(err) => {
                log::error!("capability query failed: {err}");
                Err(CapsError(err))
            }
        };

        if cell.set(outcome.clone()) {
            return outcome;
        }
        // Someone recorded first; theirs is the outcome everyone sees.
        cell.try_get().cloned().unwrap_or(outcome)
    }
}

impl<T> Deref for InitGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for InitGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: Default> Default for CapsCache<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::native::mock;

    #[test]
    fn computes_once_then_serves_cached() {
        let cache = CapsCache::new(());
        let mut calls = 0;

        let guard = cache.lock();
        let first = guard
            .get_or_compute(|| {
                calls += 1;
                Ok(mock::caps("first"))
            })
            .unwrap();
        let second = guard
            .get_or_compute(|| {
                calls += 1;
                Ok(mock::caps("second"))
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.is_valid());
    }

    #[test]
    fn concurrent_first_use_computes_once() {
        let cache = Arc::new(CapsCache::new(()));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.lock().get_or_compute(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        Ok(mock::caps("racy"))
                    })
                })
            })
            .collect();

        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&results[0], &results[1]));
    }

    #[test]
    fn failure_is_sticky() {
        let cache = CapsCache::new(());
        let guard = cache.lock();

        let err = guard
            .get_or_compute(|| Err(NativeError::CapsQuery("driver hiccup".into())))
            .unwrap_err();
        assert_eq!(err.0, NativeError::CapsQuery("driver hiccup".into()));

        let again = guard.get_or_compute(|| Ok(mock::caps("late")));
        assert!(again.is_err());
        assert!(!cache.is_valid());
        assert!(matches!(cache.get(), Some(Err(_))));
    }

    #[test]
    fn guard_derefs_to_guarded_state() {
        let mut cache = CapsCache::new(vec![1u32]);
        cache.lock().push(2);
        assert_eq!(*cache.lock(), vec![1, 2]);
        cache.get_mut().clear();
        assert!(cache.lock().is_empty());
    }

    #[test]
    fn empty_cache_reports_nothing() {
        let cache = CapsCache::new(());
        assert!(cache.get().is_none());
        assert!(!cache.is_valid());
    }
}
