// ABOUTME: Token usage accounting and cost estimation.
// ABOUTME: Parses usage telemetry from captured terminal text and prices it per model.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Cumulative usage for one session. Counters only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub estimated_cost_usd: f64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fingerprint of the last scraped telemetry match, so an unchanged screen is not counted twice.
    #[serde(default)]
    pub last_fingerprint: Option<String>,
}

/// Usage figures observed once, either scraped from a pane or reported by the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Rates in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    /// Keyed by a model family substring ("opus", "sonnet", ...).
    pub models: BTreeMap<String, ModelPrice>,
    pub default: ModelPrice,
}

impl Default for PriceTable {
    fn default() -> Self {
        let sonnet = ModelPrice {
            input: 3.0,
            output: 15.0,
        };
        let mut models = BTreeMap::new();
        models.insert(
            "opus".to_string(),
            ModelPrice {
                input: 15.0,
                output: 75.0,
            },
        );
        models.insert("sonnet".to_string(), sonnet);
        models.insert(
            "haiku".to_string(),
            ModelPrice {
                input: 0.8,
                output: 4.0,
            },
        );
        Self {
            models,
            default: sonnet,
        }
    }
}

impl PriceTable {
    /// Merge configured overrides on top of the built-in table.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ModelPrice>) -> Self {
        for (model, price) in overrides {
            self.models.insert(model.to_ascii_lowercase(), *price);
        }
        self
    }

    /// Price for a model id such as "claude-sonnet-4-5"; unknown models use the default rate.
    pub fn price_for(&self, model: Option<&str>) -> ModelPrice {
        let Some(model) = model else {
            return self.default;
        };
        let model = model.to_ascii_lowercase();
        self.models
            .iter()
            .filter(|(family, _)| model.contains(family.as_str()))
            .max_by_key(|(family, _)| family.len())
            .map(|(_, price)| *price)
            .unwrap_or(self.default)
    }

    pub fn estimate(&self, model: Option<&str>, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.price_for(model);
        (input_tokens as f64 / 1e6) * price.input + (output_tokens as f64 / 1e6) * price.output
    }
}

impl Usage {
    /// Add a scraped sample to the cumulative counters, priced at the sample's model.
    pub fn add(&mut self, sample: &UsageSample, prices: &PriceTable) {
        if sample.model.is_some() {
            self.model = sample.model.clone();
        }
        self.accrue(sample.input_tokens, sample.output_tokens, prices);
    }

    /// Fold in a cumulative report written by the worker. Counters take the per-field max,
    /// so an older or partial report can never lower them. Only the growth is priced.
    pub fn absorb_report(&mut self, report: &UsageSample, prices: &PriceTable) -> bool {
        let input_delta = report.input_tokens.saturating_sub(self.input_tokens);
        let output_delta = report.output_tokens.saturating_sub(self.output_tokens);
        let model_changed = report.model.is_some() && report.model != self.model;
        if model_changed {
            self.model = report.model.clone();
        }
        if input_delta == 0 && output_delta == 0 {
            return model_changed;
        }
        self.accrue(input_delta, output_delta, prices);
        true
    }

    /// Grow the counters and the running cost. Earlier spend keeps the rate it was priced at.
    fn accrue(&mut self, input_tokens: u64, output_tokens: u64, prices: &PriceTable) {
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        self.estimated_cost_usd += prices.estimate(self.model.as_deref(), input_tokens, output_tokens);
        self.updated_at = Some(Utc::now());
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

static MODEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmodel[ \t]*[:=][ \t]*([A-Za-z0-9._\-]+)|\b((?:claude-)?(?:opus|sonnet|haiku)(?:[\-.][A-Za-z0-9.]+)*)\b")
        .expect("Invalid model telemetry regex")
});

static INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)input[ \t_-]*tokens?[ \t]*[:=]?[ \t]*([\d,]+)|([\d,]+)[ \t]+input[ \t_-]*tokens?")
        .expect("Invalid input telemetry regex")
});

static OUTPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)output[ \t_-]*tokens?[ \t]*[:=]?[ \t]*([\d,]+)|([\d,]+)[ \t]+output[ \t_-]*tokens?")
        .expect("Invalid output telemetry regex")
});

fn last_count(re: &Regex, text: &str) -> Option<(u64, String)> {
    let caps = re.captures_iter(text).last()?;
    let whole = caps.get(0)?.as_str().to_string();
    let digits = caps.get(1).or_else(|| caps.get(2))?.as_str().replace(',', "");
    digits.parse().ok().map(|n| (n, whole))
}

/// Best-effort scrape of usage telemetry from captured terminal text.
///
/// Returns the sample plus a fingerprint of the matched fragments. The format is
/// unversioned, so a miss is normal and simply yields `None`.
pub fn parse_telemetry(text: &str) -> Option<(UsageSample, String)> {
    let (input_tokens, input_match) = last_count(&INPUT_RE, text)?;
    let (output_tokens, output_match) = last_count(&OUTPUT_RE, text)?;
    let model = MODEL_RE.captures_iter(text).last().and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_ascii_lowercase())
    });

    let mut hasher = Sha256::new();
    hasher.update(model.as_deref().unwrap_or_default());
    hasher.update(b"\0");
    hasher.update(input_match.as_bytes());
    hasher.update(b"\0");
    hasher.update(output_match.as_bytes());
    let fingerprint = hex::encode(hasher.finalize());

    Some((
        UsageSample {
            model,
            input_tokens,
            output_tokens,
        },
        fingerprint,
    ))
}

/// Team-wide totals, derived on demand from per-session records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamUsage {
    pub sessions: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl TeamUsage {
    pub fn from_usages<'a>(usages: impl IntoIterator<Item = &'a Usage>) -> Self {
        usages.into_iter().fold(TeamUsage::default(), |mut acc, u| {
            acc.sessions += 1;
            acc.input_tokens += u.input_tokens;
            acc.output_tokens += u.output_tokens;
            acc.estimated_cost_usd += u.estimated_cost_usd;
            acc
        })
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
