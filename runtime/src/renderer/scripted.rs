//! In-memory renderer for tests: pages are canned responses keyed by URL.

use super::{NavigationResult, RenderContext, Renderer};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a scripted URL behaves.
#[derive(Debug, Clone)]
pub(crate) enum Page {
    /// Locator resolves to this text.
    Text(String),
    /// Page loads but the locator matches nothing.
    Empty,
    /// Navigation fails.
    Unreachable,
    /// Navigation never finishes.
    Hang,
    /// Navigation takes this long, then serves the text.
    Slow(Duration, String),
    /// The context panics while navigating.
    Panic,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Counters {
    pub fn live(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedRenderer {
    pages: HashMap<String, Page>,
    pub counters: Arc<Counters>,
    fail_launch: bool,
}

impl ScriptedRenderer {
    pub fn new(pages: impl IntoIterator<Item = (&'static str, Page)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, page)| (url.to_string(), page))
                .collect(),
            counters: Arc::new(Counters::default()),
            fail_launch: false,
        }
    }

    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Self::new([])
        }
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        if self.fail_launch {
            bail!("browser failed to start");
        }
        let opened = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let live = opened - self.counters.closed.load(Ordering::SeqCst);
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            pages: self.pages.clone(),
            current: None,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedContext {
    pages: HashMap<String, Page>,
    current: Option<String>,
    counters: Arc<Counters>,
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        match self.pages.get(url) {
            None | Some(Page::Unreachable) => bail!("net::ERR_NAME_NOT_RESOLVED"),
            Some(Page::Hang) => std::future::pending::<()>().await,
            Some(Page::Panic) => panic!("renderer crashed"),
            Some(Page::Slow(delay, _)) => tokio::time::sleep(*delay).await,
            Some(_) => {}
        }
        self.current = Some(url.to_string());
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let url = self.current.as_ref().ok_or_else(|| anyhow!("nothing loaded"))?;
        if script.contains("\"!!invalid\"") {
            return Ok(serde_json::json!({ "status": "invalid", "error": "SyntaxError" }));
        }
        match self.pages.get(url) {
            Some(Page::Text(text)) | Some(Page::Slow(_, text)) => {
                Ok(serde_json::json!({ "status": "found", "text": text }))
            }
            _ => Ok(serde_json::json!({ "status": "missing" })),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
