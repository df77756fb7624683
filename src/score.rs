use serde::{Deserialize, Serialize};

use crate::{
    extract::{CostShare, CoverageRecord},
    loader::{CostType, Pharmacy, Tier},
};

pub const MAX_SCORE: f64 = 100.0;
pub const TIER_WEIGHT: f64 = 40.0;
pub const TIER_FLOOR: u8 = 5;
pub const PA_PENALTY: f64 = 20.0;
pub const ST_PENALTY: f64 = 20.0;
pub const QL_PENALTY: f64 = 10.0;
pub const COST_WEIGHT: f64 = 10.0;
/// Partial credit for a record whose tier has no published cost sharing.
pub const MISSING_COST_SUBSCORE: f64 = 0.5;

/// Copay dollars: below the first bound is full credit, below the second half.
pub const COPAY_BANDS: [f64; 2] = [50.0, 100.0];
/// Coinsurance percent bands, read the same way as `COPAY_BANDS`.
pub const COINSURANCE_BANDS: [f64; 2] = [25.0, 33.0];

/// Point allocation of the access score. Every field can be overridden from
/// the `[weights]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub tier_weight: f64,
    pub tier_floor: u8,
    pub prior_auth_penalty: f64,
    pub step_therapy_penalty: f64,
    pub quantity_limit_penalty: f64,
    pub cost_weight: f64,
    pub missing_cost_subscore: f64,
    pub copay_bands: [f64; 2],
    pub coinsurance_bands: [f64; 2],
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            tier_weight: TIER_WEIGHT,
            tier_floor: TIER_FLOOR,
            prior_auth_penalty: PA_PENALTY,
            step_therapy_penalty: ST_PENALTY,
            quantity_limit_penalty: QL_PENALTY,
            cost_weight: COST_WEIGHT,
            missing_cost_subscore: MISSING_COST_SUBSCORE,
            copay_bands: COPAY_BANDS,
            coinsurance_bands: COINSURANCE_BANDS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Channel whose cost sharing is scored.
    pub pharmacy: Pharmacy,
}

/// 1.0 at tier 1 falling linearly to 0.0 at the floor tier and beyond.
pub fn tier_subscore(tier: Tier, floor: u8) -> f64 {
    let floor = floor.max(2);
    let steps = f64::from(floor - 1);
    let above_first = f64::from(tier.level().saturating_sub(1).min(floor - 1));
    1.0 - above_first / steps
}

fn banded(amount: f64, bands: [f64; 2]) -> f64 {
    if amount < bands[0] {
        1.0
    } else if amount < bands[1] {
        0.5
    } else {
        0.0
    }
}

pub fn cost_subscore(cost: &CostShare, pharmacy: Pharmacy, weights: &ScoringWeights) -> f64 {
    let amount = cost.amount(pharmacy);
    match cost.cost_type {
        CostType::Copay => banded(amount, weights.copay_bands),
        CostType::Coinsurance => banded(amount, weights.coinsurance_bands),
        CostType::Unknown => weights.missing_cost_subscore,
    }
}

/// Access score in `[0, MAX_SCORE]`; higher means easier access.
pub fn score_record(record: &CoverageRecord, config: &ScoringConfig) -> f64 {
    let w = &config.weights;
    let tier_loss = w.tier_weight * (1.0 - tier_subscore(record.tier, w.tier_floor));
    let cost_loss = w.cost_weight * (1.0 - cost_subscore(&record.cost, config.pharmacy, w));

    let mut score = MAX_SCORE - tier_loss - cost_loss;
    if record.prior_auth {
        score -= w.prior_auth_penalty;
    }
    if record.step_therapy {
        score -= w.step_therapy_penalty;
    }
    if record.quantity_limit {
        score -= w.quantity_limit_penalty;
    }
    score.clamp(0.0, MAX_SCORE)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCoverage {
    #[serde(flatten)]
    pub record: CoverageRecord,
    pub access_score: f64,
}

pub fn score_all(records: Vec<CoverageRecord>, config: &ScoringConfig) -> Vec<ScoredCoverage> {
    records
        .into_iter()
        .map(|record| {
            let access_score = score_record(&record, config);
            ScoredCoverage {
                record,
                access_score,
            }
        })
        .collect()
}
