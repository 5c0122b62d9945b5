//! Rendering engine abstraction.
//!
//! A [`Renderer`] is a factory for isolated browser contexts. Every context
//! owns its own browser state (cookies, storage, cache) and must be closed
//! explicitly; the pool wraps contexts in leases that guarantee this.

pub mod chromium;

#[cfg(test)]
pub(crate) mod scripted;

use anyhow::Result;
use async_trait::async_trait;

/// Outcome of a page navigation.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    /// URL after redirects.
    pub final_url: String,
    /// Time from navigation start to load event.
    pub load_time_ms: u64,
}

/// A single isolated rendering session.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Load `url` and wait for the document to finish loading.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;

    /// Evaluate a script in the loaded document and return its JSON value.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;

    /// Tear the session down and release every process and file it holds.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Factory for rendering sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Start a fresh, isolated context.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
