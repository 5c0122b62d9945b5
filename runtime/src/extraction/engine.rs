//! Concurrent extraction over a catalog using the session pool.

use super::locator::{self, Probe};
use super::{normalize_price, ExtractionResult, ItemFailure};
use crate::catalog::ItemRecord;
use crate::pool::PoolManager;
use crate::renderer::RenderContext;
use futures::FutureExt;
use rust_decimal::Decimal;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing knobs for one item.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Hard limit for the whole item (load, probe, parse).
    pub item_timeout: Duration,
    /// Limit for the page load alone.
    pub navigation_timeout: Duration,
    /// How long to keep re-probing a locator that has not matched yet.
    pub settle: Duration,
    /// Delay between probes while settling.
    pub poll_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(45),
            navigation_timeout: Duration::from_secs(30),
            settle: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// The batch was aborted by the caller before every item finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("batch cancelled")]
pub struct BatchCancelled;

/// Runs extraction for whole catalogs.
pub struct ExtractionEngine {
    pool: Arc<PoolManager>,
    options: Arc<EngineOptions>,
}

impl ExtractionEngine {
    pub fn new(pool: Arc<PoolManager>, options: EngineOptions) -> Self {
        Self {
            pool,
            options: Arc::new(options),
        }
    }

    pub fn pool(&self) -> &PoolManager {
        &self.pool
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Extract every record, at most `pool.max_contexts()` at a time.
    ///
    /// Returns one result per record in catalog order. On cancellation all
    /// in-flight sessions are closed before `BatchCancelled` is returned.
    pub async fn extract_all(
        &self,
        catalog: &[ItemRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractionResult>, BatchCancelled> {
        info!(
            items = catalog.len(),
            concurrency = self.pool.max_contexts(),
            renderer = self.pool.renderer_name(),
            "extraction started"
        );

        let mut workers = JoinSet::new();
        for (index, record) in catalog.iter().cloned().enumerate() {
            let pool = Arc::clone(&self.pool);
            let options = Arc::clone(&self.options);
            let cancel = cancel.clone();

            workers.spawn(async move {
                let run = AssertUnwindSafe(run_item(&pool, index, &record, &options, &cancel));
                let outcome = run.catch_unwind().await;
                match outcome {
                    Ok(outcome) => (index, outcome),
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(row = index, url = %record.url, "extraction worker panicked: {message}");
                        let failed = ExtractionResult::failed(index, record, ItemFailure::Fault(message), 0);
                        (index, Some(failed))
                    }
                }
            });
        }

        // Workers finish in any order; slot results back by row.
        let mut slots: Vec<Option<ExtractionResult>> = vec![None; catalog.len()];
        let mut cancelled = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, Some(result))) => slots[index] = Some(result),
                Ok((_, None)) => cancelled = true,
                Err(e) => {
                    warn!("extraction worker lost: {e}");
                    cancelled |= e.is_cancelled();
                }
            }
        }

        if cancelled || cancel.is_cancelled() {
            warn!("extraction cancelled");
            return Err(BatchCancelled);
        }

        let results: Vec<ExtractionResult> = slots
            .into_iter()
            .zip(catalog)
            .enumerate()
            .map(|(index, (slot, record))| {
                slot.unwrap_or_else(|| {
                    ExtractionResult::failed(
                        index,
                        record.clone(),
                        ItemFailure::Fault("worker did not report".into()),
                        0,
                    )
                })
            })
            .collect();

        let priced = results.iter().filter(|r| r.is_ok()).count();
        info!(items = results.len(), priced, failed = results.len() - priced, "extraction finished");
        Ok(results)
    }
}

/// One item end to end. `None` means the batch was cancelled.
async fn run_item(
    pool: &PoolManager,
    index: usize,
    record: &ItemRecord,
    options: &EngineOptions,
    cancel: &CancellationToken,
) -> Option<ExtractionResult> {
    let started = Instant::now();
    let elapsed = || started.elapsed().as_millis() as u64;

    // Rows that can never load do not need a browser.
    if let Err(failure) = preflight(record) {
        warn!(row = index, url = %record.url, "skipping row: {failure}");
        return Some(ExtractionResult::failed(index, record.clone(), failure, elapsed()));
    }

    let slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        slot = pool.reserve() => slot,
    };
    let mut lease = match slot {
        Ok(slot) => match pool.open(slot).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(row = index, url = %record.url, "session start failed: {e:#}");
                let failure = ItemFailure::Session(format!("{e:#}"));
                return Some(ExtractionResult::failed(index, record.clone(), failure, elapsed()));
            }
        },
        Err(e) => {
            let failure = ItemFailure::Session(format!("{e:#}"));
            return Some(ExtractionResult::failed(index, record.clone(), failure, elapsed()));
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = tokio::time::timeout(
            options.item_timeout,
            extract_one(lease.context_mut(), record, options),
        ) => Some(outcome),
    };

    lease.release().await;

    let result = match outcome? {
        Ok(Ok(price)) => {
            debug!(row = index, url = %record.url, %price, "price extracted");
            ExtractionResult::ok(index, record.clone(), price, elapsed())
        }
        Ok(Err(failure)) => {
            warn!(row = index, url = %record.url, category = ?failure.category(), "extraction failed: {failure}");
            ExtractionResult::failed(index, record.clone(), failure, elapsed())
        }
        Err(_) => {
            let limit = options.item_timeout.as_millis() as u64;
            warn!(row = index, url = %record.url, "extraction timed out after {limit}ms");
            ExtractionResult::failed(index, record.clone(), ItemFailure::Timeout(limit), elapsed())
        }
    };
    Some(result)
}

/// Checks that need no browser: the URL parses with a loadable scheme and
/// the locator is not blank.
pub fn preflight(record: &ItemRecord) -> Result<(), ItemFailure> {
    let target = record.url.trim();
    let parsed =
        url::Url::parse(target).map_err(|e| ItemFailure::InvalidUrl(format!("'{target}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https" | "file") {
        return Err(ItemFailure::InvalidUrl(format!(
            "'{target}': unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if record.locator.trim().is_empty() {
        return Err(ItemFailure::InvalidLocator("empty locator".into()));
    }
    Ok(())
}

/// Load one record's page in `context` and read its price.
pub async fn extract_one(
    context: &mut dyn RenderContext,
    record: &ItemRecord,
    options: &EngineOptions,
) -> Result<Decimal, ItemFailure> {
    preflight(record)?;
    let target = record.url.trim();
    let locator = record.locator.trim();

    let navigation = context
        .navigate(target, options.navigation_timeout.as_millis() as u64)
        .await
        .map_err(|e| ItemFailure::Fetch(format!("{e:#}")))?;
    debug!(url = target, final_url = %navigation.final_url, load_ms = navigation.load_time_ms, "page loaded");

    let probe = locator::probe_until_found(&*context, locator, options.settle, options.poll_interval)
        .await
        .map_err(|e| ItemFailure::Fetch(format!("{e:#}")))?;

    match probe {
        Probe::Found { text } if text.trim().is_empty() => Err(ItemFailure::EmptyText),
        Probe::Found { text } => Ok(normalize_price(&text)?),
        Probe::Missing => Err(ItemFailure::NotFound),
        Probe::Invalid { error } => Err(ItemFailure::InvalidLocator(error)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::{Page, ScriptedRenderer};
    use crate::renderer::Renderer;
    use std::str::FromStr;

    fn options() -> EngineOptions {
        EngineOptions {
            item_timeout: Duration::from_millis(200),
            navigation_timeout: Duration::from_millis(100),
            settle: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn engine(renderer: ScriptedRenderer, concurrency: usize) -> ExtractionEngine {
        ExtractionEngine::new(Arc::new(PoolManager::new(Arc::new(renderer), concurrency)), options())
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_single_item_end_to_end() {
        let renderer = ScriptedRenderer::new([("http://x/1", Page::Text("12.50".into()))]);
        let engine = engine(renderer, 1);
        let catalog = vec![ItemRecord::new("Widget", "http://x/1", "//span[@class='p']")];

        let results = engine.extract_all(&catalog, &CancellationToken::new()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].price, Some(dec("12.50")));
        assert!(results[0].is_ok());
        assert_eq!(results[0].record, catalog[0]);
    }

    #[tokio::test]
    async fn test_results_keep_catalog_order_with_mixed_outcomes() {
        let renderer = ScriptedRenderer::new([
            ("http://x/slow", Page::Slow(Duration::from_millis(40), "$19.99".into())),
            ("http://x/fast", Page::Text("1 234,56 ₽".into())),
            ("http://x/empty", Page::Empty),
            ("http://x/words", Page::Text("call us".into())),
            ("http://x/blank", Page::Text("   ".into())),
        ]);
        let counters = Arc::clone(&renderer.counters);
        let engine = engine(renderer, 3);
        let catalog = vec![
            ItemRecord::new("slow", "http://x/slow", "//p"),
            ItemRecord::new("fast", "http://x/fast", "//p"),
            ItemRecord::new("down", "http://x/down", "//p"),
            ItemRecord::new("empty", "http://x/empty", "//p"),
            ItemRecord::new("words", "http://x/words", "//p"),
            ItemRecord::new("blank", "http://x/blank", "//p"),
            ItemRecord::new("bad url", "not a url", "//p"),
        ];

        let results = engine.extract_all(&catalog, &CancellationToken::new()).await.unwrap();

        let titles: Vec<_> = results.iter().map(|r| r.record.title.as_str()).collect();
        assert_eq!(titles, vec!["slow", "fast", "down", "empty", "words", "blank", "bad url"]);
        assert!(results.iter().enumerate().all(|(i, r)| r.index == i));

        assert_eq!(results[0].price, Some(dec("19.99")));
        assert_eq!(results[1].price, Some(dec("1234.56")));
        assert!(matches!(results[2].failure(), Some(ItemFailure::Fetch(_))));
        assert_eq!(results[3].failure(), Some(&ItemFailure::NotFound));
        assert_eq!(results[4].failure(), Some(&ItemFailure::NoNumber("call us".into())));
        assert_eq!(results[5].failure(), Some(&ItemFailure::EmptyText));
        assert!(matches!(results[6].failure(), Some(ItemFailure::InvalidUrl(_))));

        assert_eq!(counters.live(), 0);
        assert!(counters.peak.load(std::sync::atomic::Ordering::SeqCst) <= 3);
        assert_eq!(engine.pool().active(), 0);
    }

    #[tokio::test]
    async fn test_sessions_released_on_forced_failures() {
        let renderer = ScriptedRenderer::new([
            ("http://x/hang", Page::Hang),
            ("http://x/ok", Page::Text("5".into())),
        ]);
        let counters = Arc::clone(&renderer.counters);
        let engine = engine(renderer, 2);
        let catalog = vec![
            ItemRecord::new("hang", "http://x/hang", "//p"),
            ItemRecord::new("invalid", "http://x/ok", "!!invalid"),
            ItemRecord::new("unreachable", "http://x/nowhere", "//p"),
            ItemRecord::new("ok", "http://x/ok", "//p"),
        ];

        let results = engine.extract_all(&catalog, &CancellationToken::new()).await.unwrap();

        assert_eq!(results[0].failure(), Some(&ItemFailure::Timeout(200)));
        assert!(matches!(results[1].failure(), Some(ItemFailure::InvalidLocator(_))));
        assert!(matches!(results[2].failure(), Some(ItemFailure::Fetch(_))));
        assert_eq!(results[3].price, Some(dec("5")));

        // Every row here passes preflight, so each got its own session.
        assert_eq!(counters.opened.load(std::sync::atomic::Ordering::SeqCst), 4);
        assert_eq!(counters.live(), 0);
        assert_eq!(engine.pool().active(), 0);
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_failed_item() {
        let renderer = ScriptedRenderer::new([
            ("http://x/crash", Page::Panic),
            ("http://x/ok", Page::Text("7.10".into())),
        ]);
        let counters = Arc::clone(&renderer.counters);
        let engine = engine(renderer, 2);
        let catalog = vec![
            ItemRecord::new("crash", "http://x/crash", "//p"),
            ItemRecord::new("ok", "http://x/ok", "//p"),
        ];

        let results = engine.extract_all(&catalog, &CancellationToken::new()).await.unwrap();
        assert_eq!(results[0].failure(), Some(&ItemFailure::Fault("renderer crashed".into())));
        assert_eq!(results[1].price, Some(dec("7.10")));

        for _ in 0..10 {
            if counters.live() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(counters.live(), 0);
    }

    #[tokio::test]
    async fn test_session_start_failure_is_per_item() {
        let engine = engine(ScriptedRenderer::failing_launch(), 2);
        let catalog = vec![
            ItemRecord::new("a", "http://x/a", "//p"),
            ItemRecord::new("b", "http://x/b", "//p"),
        ];
        let results = engine.extract_all(&catalog, &CancellationToken::new()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r.failure(), Some(ItemFailure::Session(_)))));
    }

    #[tokio::test]
    async fn test_cancellation_releases_in_flight_sessions() {
        let renderer = ScriptedRenderer::new([("http://x/hang", Page::Hang)]);
        let counters = Arc::clone(&renderer.counters);
        let mut opts = options();
        opts.item_timeout = Duration::from_secs(60);
        let engine = ExtractionEngine::new(Arc::new(PoolManager::new(Arc::new(renderer), 2)), opts);
        let catalog: Vec<_> = (0..5)
            .map(|i| ItemRecord::new(format!("item {i}"), "http://x/hang", "//p"))
            .collect();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = engine.extract_all(&catalog, &cancel).await;
        assert_eq!(result, Err(BatchCancelled));
        assert_eq!(counters.opened.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(counters.live(), 0);
        assert_eq!(engine.pool().active(), 0);
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let engine = engine(ScriptedRenderer::new([]), 1);
        let results = engine.extract_all(&[], &CancellationToken::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_extract_one_rejects_unsupported_scheme_before_loading() {
        let renderer = ScriptedRenderer::new([]);
        let mut context = renderer.new_context().await.unwrap();
        let record = ItemRecord::new("ftp", "ftp://x/1", "//p");
        let err = extract_one(context.as_mut(), &record, &options()).await.unwrap_err();
        assert!(matches!(err, ItemFailure::InvalidUrl(_)));
        context.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_preflight_failures_never_open_a_session() {
        let renderer = ScriptedRenderer::new([]);
        let counters = Arc::clone(&renderer.counters);
        let engine = engine(renderer, 1);
        let catalog = vec![
            ItemRecord::new("no url", "", "//p"),
            ItemRecord::new("no locator", "http://x/1", "  "),
        ];
        let results = engine.extract_all(&catalog, &CancellationToken::new()).await.unwrap();
        assert!(matches!(results[0].failure(), Some(ItemFailure::InvalidUrl(_))));
        assert!(matches!(results[1].failure(), Some(ItemFailure::InvalidLocator(_))));
        assert_eq!(counters.opened.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
