use serde::{Deserialize, Serialize};

use super::returns::Scenario;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetClass {
    DomesticEquity,
    InternationalEquity,
    Bonds,
    Reits,
    Gold,
    Cash,
}

impl AssetClass {
    pub const ALL: [AssetClass; 6] = [
        AssetClass::DomesticEquity,
        AssetClass::InternationalEquity,
        AssetClass::Bonds,
        AssetClass::Reits,
        AssetClass::Gold,
        AssetClass::Cash,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AssetClass::DomesticEquity => "Domestic Equity",
            AssetClass::InternationalEquity => "International Equity",
            AssetClass::Bonds => "Bonds",
            AssetClass::Reits => "REITs",
            AssetClass::Gold => "Gold/Alternatives",
            AssetClass::Cash => "Cash",
        }
    }
}

/// Percentage weights per asset class. Expected to be non-negative and sum
/// to 100, but nothing here enforces it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAllocation {
    pub domestic_equity: f64,
    pub international_equity: f64,
    pub bonds: f64,
    pub reits: f64,
    pub gold: f64,
    pub cash: f64,
}

impl AssetAllocation {
    pub fn new(
        domestic_equity: f64,
        international_equity: f64,
        bonds: f64,
        reits: f64,
        gold: f64,
        cash: f64,
    ) -> Self {
        Self {
            domestic_equity,
            international_equity,
            bonds,
            reits,
            gold,
            cash,
        }
    }

    pub fn weight(&self, asset: AssetClass) -> f64 {
        match asset {
            AssetClass::DomesticEquity => self.domestic_equity,
            AssetClass::InternationalEquity => self.international_equity,
            AssetClass::Bonds => self.bonds,
            AssetClass::Reits => self.reits,
            AssetClass::Gold => self.gold,
            AssetClass::Cash => self.cash,
        }
    }

    pub fn weight_mut(&mut self, asset: AssetClass) -> &mut f64 {
        match asset {
            AssetClass::DomesticEquity => &mut self.domestic_equity,
            AssetClass::InternationalEquity => &mut self.international_equity,
            AssetClass::Bonds => &mut self.bonds,
            AssetClass::Reits => &mut self.reits,
            AssetClass::Gold => &mut self.gold,
            AssetClass::Cash => &mut self.cash,
        }
    }

    pub fn total(&self) -> f64 {
        AssetClass::ALL.iter().map(|&a| self.weight(a)).sum()
    }

    pub fn equity(&self) -> f64 {
        self.domestic_equity + self.international_equity
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundUp {
    pub avg_tx_per_month: f64,
    pub avg_tx_amount: f64,
    pub round_up_to: f64,
    pub multiplier: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionInputs {
    pub amount: f64,
    pub frequency: Frequency,
    pub start_delay_months: u32,
    pub annual_escalation_percent: f64,
    pub skip_months_per_year: u32,
    pub round_up: Option<RoundUp>,
}

impl ContributionInputs {
    pub fn monthly(amount: f64) -> Self {
        Self {
            amount,
            frequency: Frequency::Monthly,
            start_delay_months: 0,
            annual_escalation_percent: 0.0,
            skip_months_per_year: 0,
            round_up: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlidePath {
    pub enabled: bool,
    pub reduce_equity_percent_per_step: f64,
    pub every_years: u32,
    pub floor_percent: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketShock {
    pub enabled: bool,
    pub year: u32,
    pub magnitude_percent: f64,
    pub recovery_percent: Option<f64>,
}

/// Longest projection the month index can address.
pub const MAX_DURATION_YEARS: u32 = u32::MAX / 12 - 1;

/// Rates are fractions (0.01 == 1%).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub scenario: Scenario,
    pub fees: f64,
    pub tax_drag: f64,
    pub inflation: f64,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            scenario: Scenario::Medium,
            fees: 0.0,
            tax_drag: 0.0,
            inflation: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionInputs {
    pub lump_sum: f64,
    pub contribution: ContributionInputs,
    /// Months are indexed with `u32`, so projections are limited to
    /// `MAX_DURATION_YEARS`.
    pub duration_years: u32,
    pub allocation: AssetAllocation,
    pub assumptions: MarketAssumptions,
    pub glide_path: GlidePath,
    pub shock: MarketShock,
    pub target_amount: Option<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub num_simulations: u32,
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            num_simulations: 1_000,
            seed: 42,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlySnapshot {
    pub year: u32,
    pub contributions: f64,
    pub portfolio_value: f64,
    pub returns: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalOutcome {
    pub final_value_real: f64,
    pub success_probability: Option<f64>,
    pub required_monthly: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub yearly_snapshots: Vec<YearlySnapshot>,
    pub final_value: f64,
    pub total_contributions: f64,
    pub total_returns: f64,
    pub monthly_contribution: f64,
    pub goal: GoalOutcome,
}

/// Headline figures of one what-if scenario next to the baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioComparison {
    pub name: String,
    pub final_value: f64,
    pub final_value_real: f64,
    pub total_contributions: f64,
    pub difference_from_baseline: f64,
    pub success_probability: Option<f64>,
}

impl ScenarioComparison {
    pub fn new(name: &str, result: &SimulationResult, baseline: &SimulationResult) -> Self {
        Self {
            name: name.to_string(),
            final_value: result.final_value,
            final_value_real: result.goal.final_value_real,
            total_contributions: result.total_contributions,
            difference_from_baseline: result.final_value - baseline.final_value,
            success_probability: result.goal.success_probability,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    pub year: u32,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalStats {
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub p10: f64,
    pub p90: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    #[serde(flatten)]
    pub summary: SimulationResult,
    pub percentiles: Vec<PercentileBand>,
    pub final_stats: FinalStats,
}
