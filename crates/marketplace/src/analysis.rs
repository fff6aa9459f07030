//! Market analysis over sold listings.
//!
//! Price statistics and KPIs mirror what the dashboard charts consume.
//! Listings with malformed fields are skipped rather than failing the run.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use crate::errors::Result;
use crate::models::{
    AnalysisRecord, AnalysisSummary, MarketAnalysis, MarketKpis, NewAnalysisRecord, PriceAnalysis,
    SoldItem,
};

/// How many persisted analyses feed the 30-day price trend.
pub const PRICE_TREND_WINDOW: i64 = 30;

/// Listings without a brand or condition are bucketed under this label.
const UNSPECIFIED: &str = "Unspecified";

/// Recommended listing price sits slightly under the observed average.
const OPTIMAL_PRICE_FACTOR: Decimal = dec!(0.95);

/// Listed-volume multiplier used to estimate sell-through until real
/// listed/sold counts are available from the marketplace.
const LISTED_VOLUME_ESTIMATE_FACTOR: usize = 2;

/// History store feeding the trend KPI and the analyses screen.
#[async_trait]
pub trait AnalysisHistoryRepositoryTrait: Send + Sync {
    async fn insert(&self, record: NewAnalysisRecord) -> Result<AnalysisRecord>;

    /// Most recent analyses for a search text, newest first.
    async fn recent_for_search(
        &self,
        search_text: &str,
        limit: i64,
    ) -> Result<Vec<AnalysisRecord>>;
}

/// Correct the common brand-name typos sellers type into search.
pub fn normalize_brand_name(brand: &str) -> String {
    match brand.to_lowercase().as_str() {
        "nik" => "nike".to_string(),
        "addidas" => "adidas".to_string(),
        "pumaa" => "puma".to_string(),
        "zaraa" => "zara".to_string(),
        other => other.to_string(),
    }
}

/// Normalize every word of a search text (the brand may sit anywhere in it).
pub fn normalize_search_text(text: &str) -> String {
    text.split_whitespace()
        .map(normalize_brand_name)
        .collect::<Vec<_>>()
        .join(" ")
}

struct PricedListing {
    price: Decimal,
    brand: String,
    condition: String,
    seller: String,
}

fn extract_listings(items: &[SoldItem]) -> Vec<PricedListing> {
    items
        .iter()
        .filter_map(|item| {
            let price = Decimal::from_str(item.price.amount.trim()).ok()?;
            Some(PricedListing {
                price,
                brand: item
                    .brand_title
                    .clone()
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| UNSPECIFIED.to_string()),
                condition: item
                    .status
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| UNSPECIFIED.to_string()),
                seller: item.user.login.clone(),
            })
        })
        .collect()
}

/// Compute a full analysis from fetched listings plus the persisted history
/// for the same search (newest first, as the repository returns it).
pub fn compute_analysis(
    items: &[SoldItem],
    history: &[AnalysisRecord],
    now: DateTime<Utc>,
) -> MarketAnalysis {
    let listings = extract_listings(items);
    if listings.is_empty() {
        return empty_analysis(now);
    }

    let mut prices: Vec<Decimal> = listings.iter().map(|l| l.price).collect();
    prices.sort();

    let count = Decimal::from(prices.len());
    let sum: Decimal = prices.iter().copied().sum();
    let average = (sum / count).round_dp(2);
    let median = median_of_sorted(&prices);

    let price_analysis = PriceAnalysis {
        min: prices[0],
        max: prices[prices.len() - 1],
        average,
        median,
    };

    let sellers: HashSet<&str> = listings.iter().map(|l| l.seller.as_str()).collect();
    let summary = AnalysisSummary {
        items_found: listings.len(),
        sellers_count: sellers.len(),
    };

    let mut brand_distribution: BTreeMap<String, u32> = BTreeMap::new();
    let mut condition_distribution: BTreeMap<String, u32> = BTreeMap::new();
    for listing in &listings {
        *brand_distribution.entry(listing.brand.clone()).or_default() += 1;
        *condition_distribution
            .entry(listing.condition.clone())
            .or_default() += 1;
    }

    let kpis = compute_kpis(&listings, average, sellers.len(), history);

    MarketAnalysis {
        analysis_timestamp: now,
        price_analysis,
        summary,
        brand_distribution,
        condition_distribution,
        kpis,
    }
}

fn compute_kpis(
    listings: &[PricedListing],
    average: Decimal,
    sellers_count: usize,
    history: &[AnalysisRecord],
) -> MarketKpis {
    let recommended_optimal_price = if average > Decimal::ZERO {
        (average * OPTIMAL_PRICE_FACTOR).round_dp(2)
    } else {
        Decimal::ZERO
    };

    // Real listed/sold volumes are not exposed by the catalog endpoint;
    // estimate the listed volume from the sold count.
    let listed_estimate = listings.len() * LISTED_VOLUME_ESTIMATE_FACTOR;
    let sell_through_rate = if listed_estimate > 0 {
        (Decimal::from(listings.len()) / Decimal::from(listed_estimate) * dec!(100)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    // More sellers and tighter price dispersion both read as a more
    // competitive market.
    let competitiveness_score = if sellers_count > 0 {
        let sigma = price_std_dev(listings, average);
        ((Decimal::ONE / (sigma + Decimal::ONE)) * Decimal::from(sellers_count)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    let price_trend_30d = price_trend(average, history);

    MarketKpis {
        recommended_optimal_price,
        sell_through_rate,
        relative_market_share: None,
        competitiveness_score,
        price_trend_30d,
        price_elasticity: None,
    }
}

/// Current average vs the oldest persisted one inside the window, as a
/// percentage. Zero until at least two historical analyses exist.
fn price_trend(current_average: Decimal, history: &[AnalysisRecord]) -> Decimal {
    if history.len() < 2 {
        return Decimal::ZERO;
    }

    // History arrives newest-first; the window's oldest average is last.
    let oldest_average = history
        .iter()
        .rev()
        .map(|record| record.analysis.price_analysis.average)
        .find(|average| *average > Decimal::ZERO);

    match oldest_average {
        Some(oldest) => (((current_average - oldest) / oldest) * dec!(100)).round_dp(2),
        None => Decimal::ZERO,
    }
}

fn price_std_dev(listings: &[PricedListing], average: Decimal) -> Decimal {
    if listings.len() < 2 {
        return Decimal::ZERO;
    }
    let count = Decimal::from(listings.len());
    let variance: Decimal = listings
        .iter()
        .map(|l| {
            let delta = l.price - average;
            delta * delta
        })
        .sum::<Decimal>()
        / count;
    variance.sqrt().unwrap_or(Decimal::ZERO)
}

fn median_of_sorted(prices: &[Decimal]) -> Decimal {
    let mid = prices.len() / 2;
    if prices.len() % 2 == 1 {
        prices[mid]
    } else {
        ((prices[mid - 1] + prices[mid]) / dec!(2)).round_dp(2)
    }
}

/// The zeroed analysis persisted when a search finds nothing, so the
/// history still records that the market was checked.
pub fn empty_analysis(now: DateTime<Utc>) -> MarketAnalysis {
    MarketAnalysis {
        analysis_timestamp: now,
        price_analysis: PriceAnalysis {
            min: Decimal::ZERO,
            max: Decimal::ZERO,
            average: Decimal::ZERO,
            median: Decimal::ZERO,
        },
        summary: AnalysisSummary {
            items_found: 0,
            sellers_count: 0,
        },
        brand_distribution: BTreeMap::new(),
        condition_distribution: BTreeMap::new(),
        kpis: MarketKpis {
            recommended_optimal_price: Decimal::ZERO,
            sell_through_rate: Decimal::ZERO,
            relative_market_share: None,
            competitiveness_score: Decimal::ZERO,
            price_trend_30d: Decimal::ZERO,
            price_elasticity: None,
        },
    }
}
