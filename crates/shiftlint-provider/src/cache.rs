use crate::Result;
use crate::traits::{DepDagsByFile, DepsByFile};
use std::sync::{Arc, RwLock};

/// Per-session dependency cache.
///
/// Readers share; a single writer populates after the first fetch. The
/// fetch itself runs outside the lock so no lock is held across a blocking
/// provider call; a racing second fetch loses to the first write.
#[derive(Debug, Default)]
pub struct DependencyCache {
    flat: RwLock<Option<Arc<DepsByFile>>>,
    dag: RwLock<Option<Arc<DepDagsByFile>>>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flat<F>(&self, fetch: F) -> Result<Arc<DepsByFile>>
    where
        F: FnOnce() -> Result<DepsByFile>,
    {
        if let Some(cached) = self.flat.read().expect("dep cache poisoned").as_ref() {
            return Ok(cached.clone());
        }
        let fetched = Arc::new(fetch()?);
        let mut slot = self.flat.write().expect("dep cache poisoned");
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        *slot = Some(fetched.clone());
        Ok(fetched)
    }

    pub fn dag<F>(&self, fetch: F) -> Result<Arc<DepDagsByFile>>
    where
        F: FnOnce() -> Result<DepDagsByFile>,
    {
        if let Some(cached) = self.dag.read().expect("dep cache poisoned").as_ref() {
            return Ok(cached.clone());
        }
        let fetched = Arc::new(fetch()?);
        let mut slot = self.dag.write().expect("dep cache poisoned");
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        *slot = Some(fetched.clone());
        Ok(fetched)
    }

    /// Drop cached results, forcing the next read to refetch.
    pub fn invalidate(&self) {
        *self.flat.write().expect("dep cache poisoned") = None;
        *self.dag.write().expect("dep cache poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftlint_types::Dependency;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_deps() -> DepsByFile {
        let mut map = BTreeMap::new();
        map.insert(
            "file:///src/pom.xml".to_string(),
            vec![Dependency {
                name: "org.foo".to_string(),
                version: "1.2.3".to_string(),
                ..Default::default()
            }],
        );
        map
    }

    #[test]
    fn fetches_once_and_serves_from_cache() {
        let cache = DependencyCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let deps = cache
                .flat(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(sample_deps())
                })
                .unwrap();
            assert_eq!(deps.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fetch_errors_are_not_cached() {
        let cache = DependencyCache::new();
        let err = cache.flat(|| Err(crate::Error::Unsupported));
        assert!(err.is_err());
        let deps = cache.flat(|| Ok(sample_deps())).unwrap();
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn invalidate_forces_refetch() {
        let cache = DependencyCache::new();
        cache.flat(|| Ok(sample_deps())).unwrap();
        cache.invalidate();
        let calls = AtomicUsize::new(0);
        cache
            .flat(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(sample_deps())
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
