//! Text rendering of a finished batch for the chat front end.

use crate::aggregate::{FailedPricePolicy, Summary};
use crate::extraction::{ExtractionResult, ItemStatus};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Markup flavour of the rendered text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStyle {
    #[default]
    Plain,
    /// Chat HTML subset: `<b>` plus escaped text.
    Html,
}

impl std::str::FromStr for RenderStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "html" => Ok(Self::Html),
            other => Err(format!("unknown render style '{other}' (expected plain|html)")),
        }
    }
}

/// Render one block per item followed by the aggregate line.
pub fn render(results: &[ExtractionResult], summary: &Summary, style: RenderStyle) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        bold(style, &format!("Catalog results ({} items):", results.len()))
    );
    out.push('\n');

    for result in results {
        render_item(&mut out, result, style);
        out.push('\n');
    }

    let basis = match summary.policy {
        FailedPricePolicy::Zero if summary.failed > 0 => ", missing prices counted as 0",
        FailedPricePolicy::Exclude if summary.failed > 0 => ", missing prices excluded",
        _ => "",
    };
    let _ = write!(
        out,
        "📊 {} {} ({} of {} priced{basis})",
        bold(style, "Average price:"),
        format_price(summary.mean),
        summary.priced,
        summary.total
    );
    out
}

fn render_item(out: &mut String, result: &ExtractionResult, style: RenderStyle) {
    let record = &result.record;
    let title = if record.title.is_empty() {
        "(untitled)"
    } else {
        record.title.as_str()
    };
    let _ = writeln!(out, "🔹 {}", bold(style, &escape(style, title)));
    let _ = writeln!(out, "🌍 {}", escape(style, &record.url));
    let _ = writeln!(out, "📌 Locator: {}", escape(style, &record.locator));

    match (&result.status, result.price) {
        (ItemStatus::Ok, Some(price)) => {
            let _ = writeln!(out, "💰 Price: {}", format_price(price));
        }
        (ItemStatus::Failed(failure), _) => {
            let _ = writeln!(
                out,
                "⚠️ Price unavailable: {}",
                escape(style, &failure.to_string())
            );
        }
        (ItemStatus::Ok, None) => {
            let _ = writeln!(out, "⚠️ Price unavailable");
        }
    }
}

/// Two decimal places, half away from zero.
pub fn format_price(price: Decimal) -> String {
    let mut price = price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    price.rescale(2);
    price.to_string()
}

fn bold(style: RenderStyle, text: &str) -> String {
    match style {
        RenderStyle::Plain => text.to_string(),
        RenderStyle::Html => format!("<b>{text}</b>"),
    }
}

fn escape(style: RenderStyle, text: &str) -> String {
    match style {
        RenderStyle::Plain => text.to_string(),
        RenderStyle::Html => text
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;"),
    }
}
