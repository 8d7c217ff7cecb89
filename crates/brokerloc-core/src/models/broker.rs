//! Canonical broker listing.
//!
//! Broker rows arrive in two naming conventions (the cleaned camelCase export
//! and the original snake_case table). `RawBrokerRecord` accepts both and
//! `BrokerRecord::from_raw` reconciles them once, so nothing downstream has to
//! guess which field name a given row used.

use std::cmp::Ordering;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Upper bound of the trust score scale.
pub const MAX_TRUST_SCORE: u8 = 100;

/// Placeholder the cleaning script writes for empty text fields.
const NOT_SPECIFIED: &str = "not specified";

/// Broker row as stored, in either naming convention.
///
/// Fields other than the name are kept as raw JSON: exports disagree on
/// whether numbers are numbers or strings like "$200", and whether regulation
/// is a list, a comma-separated string or a `{regulation: ...}` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBrokerRecord {
    pub id: Option<Value>,
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(rename = "trustScore")]
    pub trust_score_camel: Option<Value>,
    #[serde(rename = "trust_score")]
    pub trust_score_snake: Option<Value>,
    pub rating: Option<Value>,
    pub overall_rating: Option<Value>,
    #[serde(rename = "minDeposit")]
    pub min_deposit_camel: Option<Value>,
    pub minimum_deposit: Option<Value>,
    pub spreads: Option<Value>,
    pub spreads_info: Option<Value>,
    #[serde(rename = "executionSpeed")]
    pub execution_speed: Option<Value>,
    pub execution_speed_ms: Option<Value>,
    pub execution: Option<Value>,
    pub commission: Option<Value>,
    pub commissions: Option<Value>,
    pub user_reviews_count: Option<Value>,
    pub reviews: Option<Value>,
    pub regulation: Option<Value>,
    pub regulatory_bodies: Option<Value>,
    pub regulation_info: Option<Value>,
}

/// Broker listing in the one shape the rest of the code uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerRecord {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub trust_score: u8,
    pub rating: f64,
    pub min_deposit: f64,
    pub eur_usd_spread: Option<f64>,
    pub execution_speed_ms: Option<f64>,
    pub commission: Option<f64>,
    pub reviews_count: Option<u64>,
    pub regulation: Vec<String>,
}

/// First number in `text`, ignoring currency symbols and thousands
/// separators ("$1,000" -> 1000, "4.5/5" -> 4.5).
fn leading_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let negative = text[..start].ends_with('-');
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    let value: f64 = digits.trim_end_matches('.').parse().ok()?;
    Some(if negative { -value } else { value })
}

fn number(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

fn number_at(map: &Option<Value>, key: &str) -> Option<f64> {
    match map.as_ref()?.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

fn count(value: &Option<Value>) -> Option<u64> {
    number(value).filter(|n| *n >= 0.0).map(|n| n.round() as u64)
}

/// Regulator names from a list, a comma-separated string, or an object
/// carrying a `regulation` field. `None` when nothing usable is present.
fn regulators(value: &Option<Value>) -> Option<Vec<String>> {
    let names: Vec<String> = match value.as_ref()? {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Value::Object(map) => return regulators(&map.get("regulation").cloned()),
        _ => return None,
    };
    let names: Vec<String> = names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case(NOT_SPECIFIED))
        .collect();
    (!names.is_empty()).then_some(names)
}

impl BrokerRecord {
    /// Fails only when the row has no name; every other field degrades to a
    /// default when it is missing or unreadable.
    pub fn from_raw(raw: RawBrokerRecord) -> Result<Self> {
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| anyhow!("Broker record has no name"))?;

        let id = match raw.id {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => raw.slug.clone().unwrap_or_else(|| name.clone()),
        };

        let trust = number(&raw.trust_score_camel)
            .or_else(|| number(&raw.trust_score_snake))
            .unwrap_or(0.0);
        let trust_score = trust.round().clamp(0.0, f64::from(MAX_TRUST_SCORE)) as u8;

        let eur_usd_spread = number_at(&raw.spreads, "EUR/USD")
            .or_else(|| number_at(&raw.spreads_info, "EURUSD"))
            .or_else(|| number_at(&raw.spreads, "eurusd"))
            .or_else(|| number_at(&raw.spreads, "EURUSD"));

        let commission = number(&raw.commission)
            .or_else(|| number_at(&raw.commissions, "per_lot"))
            .or_else(|| number_at(&raw.commissions, "perLot"))
            .or_else(|| number_at(&raw.commissions, "standard"));

        Ok(Self {
            id,
            name,
            slug: raw.slug,
            trust_score,
            rating: number(&raw.rating)
                .or_else(|| number(&raw.overall_rating))
                .unwrap_or(0.0),
            min_deposit: number(&raw.min_deposit_camel)
                .or_else(|| number(&raw.minimum_deposit))
                .unwrap_or(0.0),
            eur_usd_spread,
            execution_speed_ms: number(&raw.execution_speed)
                .or_else(|| number(&raw.execution_speed_ms))
                .or_else(|| number(&raw.execution)),
            commission,
            reviews_count: count(&raw.user_reviews_count).or_else(|| count(&raw.reviews)),
            regulation: regulators(&raw.regulation)
                .or_else(|| regulators(&raw.regulatory_bodies))
                .or_else(|| regulators(&raw.regulation_info))
                .unwrap_or_default(),
        })
    }

    /// Normalize a batch of rows, skipping (and logging) rows that can't be used.
    pub fn from_values(values: Vec<Value>) -> Vec<Self> {
        values
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| {
                let parsed = serde_json::from_value::<RawBrokerRecord>(value)
                    .map_err(anyhow::Error::from)
                    .and_then(Self::from_raw);
                match parsed {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(row = i, error = %e, "Skipping broker row");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn is_highly_trusted(&self) -> bool {
        self.trust_score >= 90
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrokerSortColumn {
    #[default]
    TrustScore,
    Spread,
    Rating,
}

impl BrokerSortColumn {
    pub fn next(&self) -> Self {
        match self {
            BrokerSortColumn::TrustScore => BrokerSortColumn::Spread,
            BrokerSortColumn::Spread => BrokerSortColumn::Rating,
            BrokerSortColumn::Rating => BrokerSortColumn::TrustScore,
        }
    }

    /// Trust and rating sort high-to-low; spread sorts tightest first with
    /// unknown spreads last.
    pub fn sort(&self, brokers: &mut [BrokerRecord]) {
        match self {
            BrokerSortColumn::TrustScore => {
                brokers.sort_by(|a, b| b.trust_score.cmp(&a.trust_score))
            }
            BrokerSortColumn::Rating => brokers.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
            BrokerSortColumn::Spread => brokers.sort_by(|a, b| match (a.eur_usd_spread, b.eur_usd_spread) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }),
        }
    }
}

impl FromStr for BrokerSortColumn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trust" | "trustscore" | "trust_score" => Ok(BrokerSortColumn::TrustScore),
            "spread" | "spreads" => Ok(BrokerSortColumn::Spread),
            "rating" => Ok(BrokerSortColumn::Rating),
            other => Err(anyhow!("Unknown sort column: {}", other)),
        }
    }
}

/// Keep brokers whose minimum deposit is at least `min`.
pub fn filter_min_deposit(brokers: Vec<BrokerRecord>, min: f64) -> Vec<BrokerRecord> {
    brokers.into_iter().filter(|b| b.min_deposit >= min).collect()
}
