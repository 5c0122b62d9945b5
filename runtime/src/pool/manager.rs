//! Pool manager for rendering sessions.
//!
//! Bounds how many sessions are alive at once and hands each one out as a
//! [`SessionLease`]. A lease always ends with its session closed: either
//! through [`SessionLease::release`] or, as a fallback, from `Drop`.

use crate::renderer::{RenderContext, Renderer};
use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Exclusive handle to one live rendering session.
pub struct SessionLease {
    context: Option<Box<dyn RenderContext>>,
    /// Held until the session is closed, so the slot never frees early.
    permit: Option<OwnedSemaphorePermit>,
    active_count: Arc<AtomicUsize>,
}

impl SessionLease {
    /// Mutable access to the session.
    pub fn context_mut(&mut self) -> &mut dyn RenderContext {
        // `context` is only taken by `release`, which consumes the lease.
        match self.context.as_mut() {
            Some(ctx) => ctx.as_mut(),
            None => unreachable!("lease used after release"),
        }
    }

    /// Close the session and give the slot back to the pool.
    pub async fn release(mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = context.close().await {
                warn!("closing rendering session failed: {e:#}");
            }
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);

        // Not released explicitly (panic or aborted task): close in the
        // background. The slot stays taken until the close finishes.
        if let Some(context) = self.context.take() {
            let permit = self.permit.take();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    debug!("closing leaked rendering session in background");
                    handle.spawn(async move {
                        if let Err(e) = context.close().await {
                            warn!("closing leaked rendering session failed: {e:#}");
                        }
                        drop(permit);
                    });
                }
                Err(_) => warn!("rendering session dropped outside a runtime; not closed"),
            }
        }
    }
}

/// A reserved pool slot with no session started yet.
pub struct Slot(OwnedSemaphorePermit);

/// Hands out rendering sessions with a concurrency limit.
pub struct PoolManager {
    renderer: Arc<dyn Renderer>,
    semaphore: Arc<Semaphore>,
    max_contexts: usize,
    active_count: Arc<AtomicUsize>,
}

impl PoolManager {
    /// Create a new pool manager. A limit of zero is treated as one.
    pub fn new(renderer: Arc<dyn Renderer>, max_contexts: usize) -> Self {
        let max_contexts = max_contexts.max(1);
        Self {
            renderer,
            semaphore: Arc::new(Semaphore::new(max_contexts)),
            max_contexts,
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start a fresh session, waiting for a free slot first.
    pub async fn acquire(&self) -> Result<SessionLease> {
        let slot = self.reserve().await?;
        self.open(slot).await
    }

    /// Wait for a free slot without starting anything.
    ///
    /// Safe to race against cancellation: dropping the future or the
    /// returned [`Slot`] holds no session.
    pub async fn reserve(&self) -> Result<Slot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("semaphore closed: {}", e))?;
        Ok(Slot(permit))
    }

    /// Start a session in a reserved slot.
    pub async fn open(&self, slot: Slot) -> Result<SessionLease> {
        let context = self.renderer.new_context().await?;
        self.active_count.fetch_add(1, Ordering::SeqCst);

        Ok(SessionLease {
            context: Some(context),
            permit: Some(slot.0),
            active_count: Arc::clone(&self.active_count),
        })
    }

    /// Number of sessions currently leased out.
    pub fn active(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Maximum allowed concurrent sessions.
    pub fn max_contexts(&self) -> usize {
        self.max_contexts
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Name of the underlying renderer.
    pub fn renderer_name(&self) -> &str {
        self.renderer.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::ScriptedRenderer;

    #[tokio::test]
    async fn test_acquire_and_release_closes_session() {
        let renderer = Arc::new(ScriptedRenderer::new([]));
        let counters = Arc::clone(&renderer.counters);
        let pool = PoolManager::new(renderer, 2);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.available(), 1);
        assert_eq!(counters.live(), 1);

        lease.release().await;
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.available(), 2);
        assert_eq!(counters.live(), 0);
    }

    #[tokio::test]
    async fn test_dropped_lease_is_closed_in_background() {
        let renderer = Arc::new(ScriptedRenderer::new([]));
        let counters = Arc::clone(&renderer.counters);
        let pool = PoolManager::new(renderer, 1);

        let lease = pool.acquire().await.unwrap();
        drop(lease);
        assert_eq!(pool.active(), 0);
        // The browser is not closed yet, so its slot is still taken.
        assert_eq!(counters.live(), 1);
        assert_eq!(pool.available(), 0);

        for _ in 0..10 {
            if counters.live() == 0 && pool.available() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(counters.live(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_returns_slot() {
        let pool = PoolManager::new(Arc::new(ScriptedRenderer::failing_launch()), 1);
        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_reserved_slot_blocks_until_dropped() {
        let pool = PoolManager::new(Arc::new(ScriptedRenderer::new([])), 1);
        let slot = pool.reserve().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(slot);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let pool = PoolManager::new(Arc::new(ScriptedRenderer::new([])), 0);
        assert_eq!(pool.max_contexts(), 1);
    }
}
