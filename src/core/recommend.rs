use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::project_deterministic;
use super::returns::{Scenario, ScenarioTables};
use super::risk::{InvestorType, RiskDimension, RiskProfileResult};
use super::types::{
    AssetAllocation, AssetClass, ContributionInputs, Frequency, GlidePath, MarketAssumptions,
    MarketShock, ProjectionInputs,
};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum GoalPriority {
    #[serde(rename = "Maximize Returns")]
    MaximizeReturns,
    #[default]
    #[serde(rename = "Balance Risk & Returns")]
    BalanceRiskAndReturns,
    #[serde(rename = "Preserve Capital")]
    PreserveCapital,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum GoalType {
    Retirement,
    Education,
    #[serde(rename = "Large Purchase")]
    LargePurchase,
    #[default]
    #[serde(rename = "Wealth Building")]
    WealthBuilding,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    #[serde(default)]
    pub id: String,
    pub goal_name: String,
    #[serde(default)]
    pub target_amount: Option<f64>,
    pub time_horizon_years: u32,
    #[serde(default)]
    pub priority: GoalPriority,
    #[serde(default)]
    pub goal_type: GoalType,
    /// Desired risk percentile (0..=100) overriding the profile.
    #[serde(default)]
    pub risk_override: Option<f64>,
}

impl Goal {
    /// Field-level problems, empty when the goal is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.goal_name.trim().chars().count() < 2 {
            errors.push("Goal name must be at least 2 characters".to_string());
        }
        if self.time_horizon_years < 1 {
            errors.push("Time horizon must be at least 1 year".to_string());
        }
        if self.target_amount.is_some_and(|t| t <= 0.0) {
            errors.push("Target amount must be positive".to_string());
        }
        errors
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionPlan {
    pub current_lump_sum: f64,
    pub monthly_contribution: f64,
    #[serde(default = "default_plan_frequency")]
    pub contribution_frequency: Frequency,
    #[serde(default)]
    pub auto_invest_preference: bool,
}

fn default_plan_frequency() -> Frequency {
    Frequency::Monthly
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub ethical_filter: bool,
    pub liquidity_requirement: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualProfile {
    pub investor_type: InvestorType,
}

/// Either a scored questionnaire or a self-selected investor type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RiskProfileInput {
    Scored(RiskProfileResult),
    Manual(ManualProfile),
}

impl RiskProfileInput {
    pub fn investor_type(&self) -> InvestorType {
        match self {
            RiskProfileInput::Scored(result) => result.investor_type,
            RiskProfileInput::Manual(manual) => manual.investor_type,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedInstruments {
    pub domestic_equity: String,
    pub international_equity: String,
    pub bonds: String,
    pub reits: String,
    pub gold: String,
    pub cash: String,
}

impl SuggestedInstruments {
    fn placeholders(ethical_filter: bool) -> Self {
        let name = |base: &str| {
            if ethical_filter {
                format!("{base} - SRI/ESG variant")
            } else {
                base.to_string()
            }
        };
        Self {
            domestic_equity: name("Domestic Large-Cap ETF (placeholder)"),
            international_equity: name("International Developed Markets ETF (placeholder)"),
            bonds: name("Government & Corporate Bond Fund (placeholder)"),
            reits: name("Real Estate Investment Trust ETF (placeholder)"),
            gold: name("Gold ETF/Commodity Fund (placeholder)"),
            cash: name("High-Yield Savings/Money Market (placeholder)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioRecommendation {
    pub allocation: AssetAllocation,
    pub rationale: String,
    pub investor_type: InvestorType,
    pub adjustments: Vec<String>,
    pub confidence: Confidence,
    pub suggested_instruments: SuggestedInstruments,
}

pub fn base_allocation(investor_type: InvestorType) -> AssetAllocation {
    match investor_type {
        InvestorType::VeryConservative => AssetAllocation::new(7.0, 3.0, 60.0, 3.0, 7.0, 20.0),
        InvestorType::Conservative => AssetAllocation::new(25.0, 8.0, 47.0, 4.0, 6.0, 10.0),
        InvestorType::Balanced => AssetAllocation::new(35.0, 15.0, 30.0, 8.0, 7.0, 5.0),
        InvestorType::Growth => AssetAllocation::new(45.0, 25.0, 12.0, 8.0, 5.0, 5.0),
        InvestorType::Aggressive => AssetAllocation::new(55.0, 32.0, 5.0, 8.0, 0.0, 0.0),
    }
}

const LONG_HORIZON_EQUITY_BOOST: f64 = 7.0;
const SHORT_HORIZON_SAFETY_BOOST: f64 = 15.0;
const CAPACITY_CASH_BUFFER: f64 = 8.0;
const LIQUIDITY_BUFFER: f64 = 7.0;

/// Signed move into equities (60/40 domestic/international); the other
/// side of the trade is bonds.
fn tilt_equity_from_bonds(allocation: &mut AssetAllocation, amount: f64) {
    allocation.domestic_equity += amount * 0.6;
    allocation.international_equity += amount * 0.4;
    allocation.bonds -= amount;
}

fn draw_from_equity(allocation: &mut AssetAllocation, amount: f64) {
    allocation.domestic_equity -= amount * 0.6;
    allocation.international_equity -= amount * 0.4;
}

fn apply_adjustments(
    profile: &RiskProfileInput,
    goal: &Goal,
    preferences: &Preferences,
) -> (AssetAllocation, Vec<String>) {
    let investor_type = profile.investor_type();
    let mut allocation = base_allocation(investor_type);
    let mut adjustments = Vec::new();
    let horizon = goal.time_horizon_years;

    if horizon > 10 {
        tilt_equity_from_bonds(&mut allocation, LONG_HORIZON_EQUITY_BOOST);
        adjustments.push(format!(
            "+{LONG_HORIZON_EQUITY_BOOST}% equities for long {horizon}-year horizon"
        ));
    } else if horizon <= 3 {
        allocation.bonds += SHORT_HORIZON_SAFETY_BOOST * 0.7;
        allocation.cash += SHORT_HORIZON_SAFETY_BOOST * 0.3;
        draw_from_equity(&mut allocation, SHORT_HORIZON_SAFETY_BOOST);
        adjustments.push(format!(
            "+{SHORT_HORIZON_SAFETY_BOOST}% bonds/cash for short {horizon}-year horizon"
        ));
    }

    if let RiskProfileInput::Scored(result) = profile {
        let capacity = result.dimension_score(RiskDimension::Capacity).unwrap_or(50.0);
        let liquidity = result.dimension_score(RiskDimension::Liquidity).unwrap_or(50.0);
        if capacity < 50.0 || liquidity < 50.0 {
            allocation.cash += CAPACITY_CASH_BUFFER;
            draw_from_equity(&mut allocation, CAPACITY_CASH_BUFFER);
            adjustments.push(format!(
                "+{CAPACITY_CASH_BUFFER}% cash buffer for income stability"
            ));
        }
    }

    if preferences.liquidity_requirement {
        allocation.cash += LIQUIDITY_BUFFER;
        allocation.bonds += LIQUIDITY_BUFFER * 0.5;
        allocation.domestic_equity -= LIQUIDITY_BUFFER * 0.9;
        allocation.international_equity -= LIQUIDITY_BUFFER * 0.6;
        // The reported figure counts cash plus bonds; the equity draw is 10.5 as well.
        let reported = LIQUIDITY_BUFFER + LIQUIDITY_BUFFER * 0.5;
        adjustments.push(format!(
            "+{reported}% liquid assets for withdrawal needs"
        ));
    }

    if let Some(target) = goal.risk_override {
        let diff = target - investor_type.implied_percentile();
        if diff.abs() > 10.0 {
            tilt_equity_from_bonds(&mut allocation, diff * 0.3);
            let direction = if diff > 0.0 { "increased" } else { "decreased" };
            adjustments.push(format!(
                "Manual risk override: {direction} equity exposure"
            ));
        }
    }

    (allocation, adjustments)
}

/// Clamps negatives to zero and rescales to whole percentages summing to
/// exactly 100, handing leftover points to the largest remainders. A zero
/// total is returned unchanged.
///
/// Rounding each weight on its own can leave the total at 99 or 101 and
/// lets a negative weight survive; both are deliberate departures from
/// per-weight rounding.
pub fn normalize_allocation(allocation: &AssetAllocation) -> AssetAllocation {
    let mut clamped = *allocation;
    for asset in AssetClass::ALL {
        let weight = clamped.weight_mut(asset);
        *weight = weight.max(0.0);
    }

    let total = clamped.total();
    if total <= 0.0 {
        return clamped;
    }

    let scaled: Vec<f64> = AssetClass::ALL
        .iter()
        .map(|&asset| clamped.weight(asset) / total * 100.0)
        .collect();
    let mut floors: Vec<f64> = scaled.iter().map(|s| s.floor()).collect();
    let assigned: f64 = floors.iter().sum();
    let leftover = (100.0 - assigned).round().max(0.0) as usize;

    let mut order: Vec<usize> = (0..scaled.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = scaled[a] - floors[a];
        let rb = scaled[b] - floors[b];
        rb.total_cmp(&ra)
    });
    for &idx in order.iter().take(leftover) {
        floors[idx] += 1.0;
    }

    let mut normalized = AssetAllocation::default();
    for (asset, weight) in AssetClass::ALL.iter().zip(floors) {
        *normalized.weight_mut(*asset) = weight;
    }
    normalized
}

fn rationale(investor_type: InvestorType, goal: &Goal, adjustments: &[String]) -> String {
    let mut text = format!(
        "Based on your {investor_type} risk profile and {}-year horizon for {}",
        goal.time_horizon_years, goal.goal_name
    );
    text.push_str(match goal.priority {
        GoalPriority::MaximizeReturns => {
            ", the allocation favors growth assets for maximum return potential"
        }
        GoalPriority::PreserveCapital => {
            ", the allocation emphasizes capital preservation with defensive assets"
        }
        GoalPriority::BalanceRiskAndReturns => {
            ", the allocation balances growth potential with risk management"
        }
    });
    if !adjustments.is_empty() {
        text.push_str(". Adjustments: ");
        text.push_str(&adjustments.join("; "));
    }
    text.push('.');
    text
}

fn confidence(goal: &Goal, contribution: &ContributionPlan, investor_type: InvestorType) -> Confidence {
    let mut points = 0;
    if goal.time_horizon_years >= 5 {
        points += 2;
    } else if goal.time_horizon_years >= 3 {
        points += 1;
    }
    if contribution.current_lump_sum > 0.0 || contribution.monthly_contribution > 0.0 {
        points += 2;
    }
    if matches!(
        investor_type,
        InvestorType::Conservative | InvestorType::Balanced | InvestorType::Growth
    ) {
        points += 1;
    }

    if points >= 4 {
        Confidence::High
    } else if points >= 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

pub fn recommend_portfolio(
    profile: &RiskProfileInput,
    goal: &Goal,
    contribution: &ContributionPlan,
    preferences: &Preferences,
) -> PortfolioRecommendation {
    let investor_type = profile.investor_type();
    let (adjusted, adjustments) = apply_adjustments(profile, goal, preferences);
    let allocation = normalize_allocation(&adjusted);

    debug!(
        investor_type = investor_type.label(),
        horizon = goal.time_horizon_years,
        adjustments = adjustments.len(),
        "portfolio recommended"
    );

    PortfolioRecommendation {
        allocation,
        rationale: rationale(investor_type, goal, &adjustments),
        investor_type,
        adjustments,
        confidence: confidence(goal, contribution, investor_type),
        suggested_instruments: SuggestedInstruments::placeholders(preferences.ethical_filter),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioProjection {
    pub year: u32,
    pub value: f64,
    pub breakdown: AssetAllocation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionResults {
    pub low: Vec<ScenarioProjection>,
    pub medium: Vec<ScenarioProjection>,
    pub high: Vec<ScenarioProjection>,
}

fn project_scenario(
    allocation: &AssetAllocation,
    lump_sum: f64,
    monthly: f64,
    years: u32,
    scenario: Scenario,
    tables: &ScenarioTables,
) -> Vec<ScenarioProjection> {
    let inputs = ProjectionInputs {
        lump_sum,
        contribution: ContributionInputs::monthly(monthly),
        duration_years: years,
        allocation: *allocation,
        assumptions: MarketAssumptions {
            scenario,
            ..MarketAssumptions::default()
        },
        glide_path: GlidePath::default(),
        shock: MarketShock::default(),
        target_amount: None,
    };

    project_deterministic(&inputs, tables)
        .yearly_snapshots
        .iter()
        .map(|snap| {
            let mut breakdown = AssetAllocation::default();
            for asset in AssetClass::ALL {
                *breakdown.weight_mut(asset) = snap.portfolio_value * allocation.weight(asset) / 100.0;
            }
            ScenarioProjection {
                year: snap.year,
                value: snap.portfolio_value.round(),
                breakdown,
            }
        })
        .collect()
}

/// Year-by-year value of a recommended allocation under the low, medium and
/// high return tables.
pub fn project_recommendation(
    allocation: &AssetAllocation,
    lump_sum: f64,
    monthly: f64,
    years: u32,
    tables: &ScenarioTables,
) -> ProjectionResults {
    ProjectionResults {
        low: project_scenario(allocation, lump_sum, monthly, years, Scenario::Low, tables),
        medium: project_scenario(allocation, lump_sum, monthly, years, Scenario::Medium, tables),
        high: project_scenario(allocation, lump_sum, monthly, years, Scenario::High, tables),
    }
}
