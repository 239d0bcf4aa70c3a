//! Per-language context pools.

use boxd_core::context::ContextInfo;
use boxd_core::kernel::KernelConnection;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Warm/capacity settings for one language.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Contexts kept warm in `available`.
    pub min: usize,
    /// Hard cap on `available + in_use`.
    pub max: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { min: 0, max: 5 }
    }
}

/// One kernel conversation wrapped in a stable context handle.
pub struct ContextEntry {
    pub id: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub kernel: Arc<dyn KernelConnection>,
    /// Pool-managed contexts return to `available` on deletion; the rest
    /// shut their kernel down.
    pub pooled: bool,
    cwd: Mutex<String>,
    last_used: Mutex<DateTime<Utc>>,
}

impl ContextEntry {
    pub fn new(
        id: String,
        language: String,
        cwd: String,
        kernel: Arc<dyn KernelConnection>,
        pooled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            language,
            created_at: now,
            kernel,
            pooled,
            cwd: Mutex::new(cwd),
            last_used: Mutex::new(now),
        }
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().unwrap().clone()
    }

    pub fn set_cwd(&self, cwd: String) {
        *self.cwd.lock().unwrap() = cwd;
    }

    pub fn touch(&self) {
        *self.last_used.lock().unwrap() = Utc::now();
    }

    pub fn info(&self) -> ContextInfo {
        ContextInfo {
            id: self.id.clone(),
            language: self.language.clone(),
            cwd: self.cwd(),
            created_at: self.created_at,
            last_used: *self.last_used.lock().unwrap(),
        }
    }
}

/// Pool state for one language.
///
/// Invariant: `available.len() + in_use.len() <= settings.max`, and a
/// context id is never in both at once.
pub struct ContextPool {
    pub settings: PoolSettings,
    pub available: Vec<Arc<ContextEntry>>,
    pub in_use: HashSet<String>,
    /// Only one warm cycle in flight per pool.
    pub warming: Arc<AtomicBool>,
}

impl ContextPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            available: Vec::new(),
            in_use: HashSet::new(),
            warming: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn total(&self) -> usize {
        self.available.len() + self.in_use.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.total() < self.settings.max
    }

    /// Take a warm context and mark it in use.
    pub fn acquire(&mut self) -> Option<Arc<ContextEntry>> {
        let entry = self.available.pop()?;
        self.in_use.insert(entry.id.clone());
        Some(entry)
    }

    /// Return a context to the warm list.
    pub fn release(&mut self, entry: Arc<ContextEntry>) {
        self.in_use.remove(&entry.id);
        entry.touch();
        self.available.push(entry);
    }

    /// Drop a context entirely (kernel being shut down by the caller).
    pub fn forget(&mut self, id: &str) {
        self.in_use.remove(id);
        self.available.retain(|entry| entry.id != id);
    }

    /// How many contexts a refill should add to get back to `min`, while
    /// respecting `max`.
    pub fn refill_need(&self) -> usize {
        let below_min = self.settings.min.saturating_sub(self.available.len());
        below_min.min(self.settings.max.saturating_sub(self.total()))
    }

    pub fn is_warming(&self) -> bool {
        self.warming.load(Ordering::SeqCst)
    }
}

/// Clears the pool's warming flag on drop so a panicking or failing warm
/// cycle never wedges the pool.
pub(crate) struct WarmingGuard {
    warming: Arc<AtomicBool>,
}

impl WarmingGuard {
    /// Returns `None` when another warm cycle already holds the flag.
    pub fn try_acquire(warming: &Arc<AtomicBool>) -> Option<Self> {
        if warming.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Self {
            warming: Arc::clone(warming),
        })
    }
}

impl Drop for WarmingGuard {
    fn drop(&mut self) {
        self.warming.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use boxd_core::kernel::KernelMessage;
    use tokio::sync::mpsc;

    struct NullKernel;

    #[async_trait]
    impl KernelConnection for NullKernel {
        async fn execute(
            &self,
            _code: &str,
        ) -> boxd_core::Result<mpsc::Receiver<KernelMessage>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn shutdown(&self) -> boxd_core::Result<()> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    fn entry(id: &str) -> Arc<ContextEntry> {
        Arc::new(ContextEntry::new(
            id.into(),
            "python".into(),
            "/workspace".into(),
            Arc::new(NullKernel),
            true,
        ))
    }

    #[test]
    fn acquire_and_release_keep_cardinality() {
        let mut pool = ContextPool::new(PoolSettings { min: 1, max: 3 });
        pool.available.push(entry("ctx_a"));
        assert_eq!(pool.total(), 1);

        let taken = pool.acquire().unwrap();
        assert_eq!(pool.available.len(), 0);
        assert!(pool.in_use.contains("ctx_a"));
        assert_eq!(pool.total(), 1);

        pool.release(taken);
        assert_eq!(pool.available.len(), 1);
        assert!(pool.in_use.is_empty());
        assert!(pool.total() <= pool.settings.max);
    }

    #[test]
    fn refill_need_respects_min_and_max() {
        let mut pool = ContextPool::new(PoolSettings { min: 2, max: 3 });
        assert_eq!(pool.refill_need(), 2);

        pool.in_use.insert("a".into());
        pool.in_use.insert("b".into());
        // Only one slot left below max even though min asks for two.
        assert_eq!(pool.refill_need(), 1);

        pool.available.push(entry("c"));
        assert_eq!(pool.refill_need(), 0);
    }

    #[test]
    fn warming_guard_is_exclusive_and_self_clearing() {
        let pool = ContextPool::new(PoolSettings::default());
        let first = WarmingGuard::try_acquire(&pool.warming);
        assert!(first.is_some());
        assert!(WarmingGuard::try_acquire(&pool.warming).is_none());
        drop(first);
        assert!(!pool.is_warming());
        assert!(WarmingGuard::try_acquire(&pool.warming).is_some());
    }
}
