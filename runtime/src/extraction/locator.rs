//! In-page locator probe.
//!
//! The locator is evaluated inside the rendered document with
//! `document.evaluate`, so anything the page's own XPath engine accepts
//! works, including attribute steps like `//meta[@itemprop='price']/@content`.

use crate::renderer::RenderContext;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};

/// What the locator found in the current document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Probe {
    Found { text: String },
    Missing,
    Invalid { error: String },
}

/// Build the script that resolves `locator` against the current document.
pub fn probe_script(locator: &str) -> String {
    // JSON string literals are valid JS string literals.
    let literal = serde_json::to_string(locator).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
    let node;
    try {{
        node = document.evaluate({literal}, document, null,
            XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    }} catch (e) {{
        return {{ status: "invalid", error: String(e && e.message || e) }};
    }}
    if (!node) return {{ status: "missing" }};
    return {{ status: "found", text: node.textContent || "" }};
}})()"#
    )
}

/// Run the probe once.
pub async fn probe(context: &dyn RenderContext, locator: &str) -> Result<Probe> {
    let value = context
        .execute_js(&probe_script(locator))
        .await
        .context("running locator probe")?;
    serde_json::from_value(value).context("decoding locator probe result")
}

/// Probe until the node appears or `settle` has elapsed.
///
/// Script-rendered prices often land after the load event, so a miss is
/// retried every `interval`. Invalid locators return immediately.
pub async fn probe_until_found(
    context: &dyn RenderContext,
    locator: &str,
    settle: Duration,
    interval: Duration,
) -> Result<Probe> {
    let deadline = Instant::now() + settle;
    loop {
        let result = probe(context, locator).await?;
        match &result {
            Probe::Missing if Instant::now() < deadline => tokio::time::sleep(interval).await,
            _ => return Ok(result),
        }
    }
}
