//! Batch summary statistics.

use crate::extraction::ExtractionResult;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// How items without a price count toward the mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedPricePolicy {
    /// Count a failed item as price 0 and divide by every row.
    #[default]
    Zero,
    /// Leave failed items out of both the sum and the count.
    Exclude,
}

impl std::str::FromStr for FailedPricePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(Self::Zero),
            "exclude" => Ok(Self::Exclude),
            other => Err(format!("unknown failed-price policy '{other}' (expected zero|exclude)")),
        }
    }
}

/// Aggregate view of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Mean price, two decimal places.
    pub mean: Decimal,
    pub total: usize,
    pub priced: usize,
    pub failed: usize,
    pub policy: FailedPricePolicy,
}

/// Mean price over `results`, rounded half away from zero to cents.
pub fn aggregate(results: &[ExtractionResult], policy: FailedPricePolicy) -> Summary {
    let total = results.len();
    let prices: Vec<Decimal> = results.iter().filter_map(|r| r.price).collect();
    let priced = prices.len();

    let denominator = match policy {
        FailedPricePolicy::Zero => total,
        FailedPricePolicy::Exclude => priced,
    };

    let mut mean =
        mean_of(&prices, denominator).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    // Values too large for two fractional digits keep their own scale.
    mean.rescale(2);

    Summary {
        mean,
        total,
        priced,
        failed: total - priced,
        policy,
    }
}

/// `sum(prices) / denominator`, never panicking. When the plain sum does not
/// fit in a `Decimal`, the mean is accumulated term by term instead.
fn mean_of(prices: &[Decimal], denominator: usize) -> Decimal {
    if denominator == 0 {
        return Decimal::ZERO;
    }
    let n = Decimal::from(denominator);

    prices
        .iter()
        .try_fold(Decimal::ZERO, |acc, price| acc.checked_add(*price))
        .and_then(|sum| sum.checked_div(n))
        .unwrap_or_else(|| {
            prices
                .iter()
                .fold(Decimal::ZERO, |acc, price| acc.saturating_add(*price / n))
        })
}
