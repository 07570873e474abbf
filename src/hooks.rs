//! Side effects that run after a write has been committed. They never change
//! the outcome of the write: failures are logged and the next hook runs.

use crate::bus::ChangeBus;
use crate::cache::ViewCache;
use crate::model::ChangeKind;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn after_commit(&self, kind: ChangeKind) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct HookList {
    hooks: Vec<Arc<dyn PostCommitHook>>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl PostCommitHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order. Returns how many succeeded.
    pub async fn run(&self, kind: ChangeKind) -> usize {
        let mut ok = 0;
        for hook in &self.hooks {
            match hook.after_commit(kind).await {
                Ok(()) => {
                    debug!(hook = hook.name(), %kind, "post-commit hook done");
                    ok += 1;
                }
                Err(err) => warn!(hook = hook.name(), %kind, ?err, "post-commit hook failed"),
            }
        }
        ok
    }
}

/// Cache keys that go stale when records of `kind` change.
pub fn stale_patterns(kind: ChangeKind) -> &'static [&'static str] {
    match kind {
        ChangeKind::Walk | ChangeKind::Activity => &["^stats:", "^(walks|activities):"],
        ChangeKind::Feeding => &["^feedings:"],
    }
}

/// Evicts the cached views a change makes stale.
pub struct InvalidateCache {
    cache: Arc<dyn ViewCache>,
}

impl InvalidateCache {
    pub fn new(cache: Arc<dyn ViewCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PostCommitHook for InvalidateCache {
    fn name(&self) -> &'static str {
        "invalidate_cache"
    }

    /// Every pattern is attempted; the first failure is returned afterwards.
    async fn after_commit(&self, kind: ChangeKind) -> Result<()> {
        let mut first_err = None;
        for pattern in stale_patterns(kind) {
            if let Err(err) = self.cache.invalidate_pattern(pattern).await {
                warn!(pattern, %kind, ?err, "cache eviction failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Publishes the change on the bus.
pub struct NotifyBus {
    bus: ChangeBus,
}

impl NotifyBus {
    pub fn new(bus: ChangeBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl PostCommitHook for NotifyBus {
    fn name(&self) -> &'static str {
        "notify_bus"
    }

    async fn after_commit(&self, kind: ChangeKind) -> Result<()> {
        self.bus.notify_change(kind);
        Ok(())
    }
}
