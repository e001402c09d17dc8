use serde::{Deserialize, Serialize};

use super::error::Result;
use super::types::{
    AssetAllocation, GlidePath, MarketAssumptions, MarketShock, ProjectionInputs,
    ScenarioComparison, SimulationResult,
};

/// Allocation in effect at `year` once the glide path has moved equity into
/// the defensive assets. The base allocation is never modified.
pub fn apply_glide_path(base: &AssetAllocation, glide: &GlidePath, year: u32) -> AssetAllocation {
    if !glide.enabled || glide.every_years == 0 {
        return *base;
    }

    let equity = base.equity();
    if equity <= 0.0 {
        return *base;
    }

    let steps = (year / glide.every_years) as f64;
    let target_equity = (equity - steps * glide.reduce_equity_percent_per_step).max(glide.floor_percent);
    let reduction = (equity - target_equity).max(0.0);
    if reduction == 0.0 {
        return *base;
    }

    let mut shifted = *base;
    shifted.domestic_equity = (base.domestic_equity - reduction * base.domestic_equity / equity).max(0.0);
    shifted.international_equity =
        (base.international_equity - reduction * base.international_equity / equity).max(0.0);

    let defensive = base.bonds + base.reits + base.gold + base.cash;
    if defensive > 0.0 {
        shifted.bonds += reduction * base.bonds / defensive;
        shifted.reits += reduction * base.reits / defensive;
        shifted.gold += reduction * base.gold / defensive;
        shifted.cash += reduction * base.cash / defensive;
    } else {
        shifted.bonds += reduction;
    }
    shifted
}

impl MarketShock {
    /// Multiplier applied to the portfolio at the start of `year`'s growth
    /// step. Year 0 has no growth step, so a shock there never fires.
    pub fn factor_for_year(&self, year: u32) -> f64 {
        if !self.enabled || year == 0 || self.year == 0 {
            return 1.0;
        }

        if year == self.year {
            return 1.0 + self.magnitude_percent / 100.0;
        }

        match self.recovery_percent {
            Some(recovery) if year == self.year + 1 => 1.0 + recovery / 100.0,
            _ => 1.0,
        }
    }
}

/// Partial allocation, each present field replaces the baseline weight.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AllocationOverride {
    pub domestic_equity: Option<f64>,
    pub international_equity: Option<f64>,
    pub bonds: Option<f64>,
    pub reits: Option<f64>,
    pub gold: Option<f64>,
    pub cash: Option<f64>,
}

/// Changes relative to a baseline plan for what-if comparison.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioDeltas {
    /// Percent change to the recurring contribution amount.
    pub contribution_change: Option<f64>,
    /// Months added to (or removed from) the start delay.
    pub start_delay_change: Option<i32>,
    pub allocation_change: Option<AllocationOverride>,
    pub glide_path: Option<GlidePath>,
    pub shock: Option<MarketShock>,
    pub assumptions: Option<MarketAssumptions>,
}

pub fn apply_scenario_deltas(base: &ProjectionInputs, deltas: &ScenarioDeltas) -> ProjectionInputs {
    let mut inputs = base.clone();

    if let Some(change) = deltas.contribution_change {
        inputs.contribution.amount *= 1.0 + change / 100.0;
    }

    if let Some(change) = deltas.start_delay_change {
        let delay = inputs.contribution.start_delay_months as i64 + change as i64;
        inputs.contribution.start_delay_months = delay.max(0) as u32;
    }

    if let Some(over) = deltas.allocation_change {
        let a = &mut inputs.allocation;
        a.domestic_equity = over.domestic_equity.unwrap_or(a.domestic_equity);
        a.international_equity = over.international_equity.unwrap_or(a.international_equity);
        a.bonds = over.bonds.unwrap_or(a.bonds);
        a.reits = over.reits.unwrap_or(a.reits);
        a.gold = over.gold.unwrap_or(a.gold);
        a.cash = over.cash.unwrap_or(a.cash);
    }

    if let Some(glide) = deltas.glide_path {
        inputs.glide_path = glide;
    }
    if let Some(shock) = deltas.shock {
        inputs.shock = shock;
    }
    if let Some(assumptions) = &deltas.assumptions {
        inputs.assumptions = assumptions.clone();
    }

    inputs
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedScenario {
    pub name: String,
    #[serde(flatten)]
    pub deltas: ScenarioDeltas,
}

/// Projects every scenario with `project` and reports it against
/// `baseline`, in input order.
pub fn compare_scenarios<F>(
    base: &ProjectionInputs,
    baseline: &SimulationResult,
    scenarios: &[NamedScenario],
    mut project: F,
) -> Result<Vec<ScenarioComparison>>
where
    F: FnMut(&ProjectionInputs) -> Result<SimulationResult>,
{
    scenarios
        .iter()
        .map(|scenario| {
            let inputs = apply_scenario_deltas(base, &scenario.deltas);
            let result = project(&inputs)?;
            Ok(ScenarioComparison::new(&scenario.name, &result, baseline))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ContributionInputs;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn growth() -> AssetAllocation {
        AssetAllocation::new(45.0, 25.0, 12.0, 8.0, 5.0, 5.0)
    }

    fn glide(reduce: f64, every: u32, floor: f64) -> GlidePath {
        GlidePath {
            enabled: true,
            reduce_equity_percent_per_step: reduce,
            every_years: every,
            floor_percent: floor,
        }
    }

    #[test]
    fn disabled_glide_path_returns_base() {
        let base = growth();
        let path = GlidePath {
            enabled: false,
            ..glide(5.0, 1, 0.0)
        };
        assert_eq!(apply_glide_path(&base, &path, 10), base);
        assert_eq!(apply_glide_path(&base, &glide(5.0, 0, 0.0), 10), base);
    }

    #[test]
    fn glide_path_steps_every_n_years() {
        let base = growth();
        let path = glide(10.0, 5, 0.0);
        assert_eq!(apply_glide_path(&base, &path, 4), base);

        let shifted = apply_glide_path(&base, &path, 5);
        assert_approx(shifted.equity(), 60.0);
        // Equity legs keep their 45:25 ratio.
        assert_approx(shifted.domestic_equity, 45.0 - 10.0 * 45.0 / 70.0);
        // Defensive assets absorb the 10 points in proportion 12:8:5:5.
        assert_approx(shifted.bonds, 12.0 + 10.0 * 12.0 / 30.0);
        assert_approx(shifted.cash, 5.0 + 10.0 * 5.0 / 30.0);
        assert_approx(shifted.total(), 100.0);
    }

    #[test]
    fn glide_path_stops_at_floor() {
        let shifted = apply_glide_path(&growth(), &glide(10.0, 1, 40.0), 30);
        assert_approx(shifted.equity(), 40.0);
        assert_approx(shifted.total(), 100.0);
    }

    #[test]
    fn glide_path_never_raises_equity_below_floor() {
        let base = AssetAllocation::new(10.0, 5.0, 60.0, 5.0, 5.0, 15.0);
        let shifted = apply_glide_path(&base, &glide(5.0, 1, 30.0), 3);
        assert_eq!(shifted, base);
    }

    #[test]
    fn glide_path_sends_everything_to_bonds_when_all_equity() {
        let base = AssetAllocation::new(60.0, 40.0, 0.0, 0.0, 0.0, 0.0);
        let shifted = apply_glide_path(&base, &glide(20.0, 1, 0.0), 1);
        assert_approx(shifted.bonds, 20.0);
        assert_approx(shifted.equity(), 80.0);
    }

    #[test]
    fn shock_fires_on_its_year_and_recovers_the_next() {
        let shock = MarketShock {
            enabled: true,
            year: 3,
            magnitude_percent: -30.0,
            recovery_percent: Some(15.0),
        };
        assert_approx(shock.factor_for_year(2), 1.0);
        assert_approx(shock.factor_for_year(3), 0.7);
        assert_approx(shock.factor_for_year(4), 1.15);
        assert_approx(shock.factor_for_year(5), 1.0);
    }

    #[test]
    fn shock_without_recovery_or_disabled_is_neutral() {
        let shock = MarketShock {
            enabled: true,
            year: 2,
            magnitude_percent: -20.0,
            recovery_percent: None,
        };
        assert_approx(shock.factor_for_year(3), 1.0);

        let off = MarketShock {
            enabled: false,
            ..shock
        };
        assert_approx(off.factor_for_year(2), 1.0);
    }

    #[test]
    fn shock_at_year_zero_never_fires() {
        let shock = MarketShock {
            enabled: true,
            year: 0,
            magnitude_percent: -50.0,
            recovery_percent: Some(10.0),
        };
        assert_approx(shock.factor_for_year(0), 1.0);
        assert_approx(shock.factor_for_year(1), 1.0);
    }

    #[test]
    fn scenario_deltas_modify_a_copy() {
        let base = ProjectionInputs {
            lump_sum: 1_000.0,
            contribution: ContributionInputs {
                start_delay_months: 2,
                ..ContributionInputs::monthly(200.0)
            },
            duration_years: 10,
            allocation: growth(),
            assumptions: MarketAssumptions::default(),
            glide_path: GlidePath::default(),
            shock: MarketShock::default(),
            target_amount: None,
        };
        let deltas = ScenarioDeltas {
            contribution_change: Some(25.0),
            start_delay_change: Some(-6),
            allocation_change: Some(AllocationOverride {
                gold: Some(0.0),
                cash: Some(15.0),
                ..AllocationOverride::default()
            }),
            ..ScenarioDeltas::default()
        };

        let changed = apply_scenario_deltas(&base, &deltas);
        assert_approx(changed.contribution.amount, 250.0);
        assert_eq!(changed.contribution.start_delay_months, 0);
        assert_approx(changed.allocation.gold, 0.0);
        assert_approx(changed.allocation.cash, 15.0);
        assert_approx(changed.allocation.bonds, 12.0);
        assert_approx(base.contribution.amount, 200.0);
    }

    fn flat_result(final_value: f64) -> SimulationResult {
        SimulationResult {
            yearly_snapshots: Vec::new(),
            final_value,
            total_contributions: 1_000.0,
            total_returns: final_value - 1_000.0,
            monthly_contribution: 0.0,
            goal: crate::core::types::GoalOutcome::default(),
        }
    }

    #[test]
    fn scenarios_are_compared_in_order_against_baseline() {
        let base = ProjectionInputs {
            lump_sum: 1_000.0,
            contribution: ContributionInputs::monthly(100.0),
            duration_years: 5,
            allocation: growth(),
            assumptions: MarketAssumptions::default(),
            glide_path: GlidePath::default(),
            shock: MarketShock::default(),
            target_amount: None,
        };
        let scenarios = vec![
            NamedScenario {
                name: "Double".to_string(),
                deltas: ScenarioDeltas {
                    contribution_change: Some(100.0),
                    ..ScenarioDeltas::default()
                },
            },
            NamedScenario {
                name: "Same".to_string(),
                deltas: ScenarioDeltas::default(),
            },
        ];
        let baseline = flat_result(2_000.0);

        let mut seen = Vec::new();
        let compared = compare_scenarios(&base, &baseline, &scenarios, |inputs| {
            seen.push(inputs.contribution.amount);
            Ok(flat_result(inputs.contribution.amount * 10.0))
        })
        .expect("projection succeeds");

        assert_eq!(seen, vec![200.0, 100.0]);
        assert_eq!(compared[0].name, "Double");
        assert_approx(compared[0].difference_from_baseline, 0.0);
        assert_approx(compared[1].difference_from_baseline, -1_000.0);
    }

    #[test]
    fn scenario_comparison_stops_at_first_error() {
        let base = ProjectionInputs {
            lump_sum: 0.0,
            contribution: ContributionInputs::monthly(0.0),
            duration_years: 1,
            allocation: growth(),
            assumptions: MarketAssumptions::default(),
            glide_path: GlidePath::default(),
            shock: MarketShock::default(),
            target_amount: None,
        };
        let scenarios = vec![NamedScenario::default(), NamedScenario::default()];
        let mut calls = 0;
        let err = compare_scenarios(&base, &flat_result(0.0), &scenarios, |_| {
            calls += 1;
            Err(crate::core::error::EngineError::InvalidSimulationCount(0))
        })
        .expect_err("error propagates");
        assert!(matches!(err, crate::core::error::EngineError::InvalidSimulationCount(0)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn named_scenario_flattens_deltas() {
        let scenario: NamedScenario =
            serde_json::from_str(r#"{"name":"Later","startDelayChange":12}"#).expect("parse");
        assert_eq!(scenario.name, "Later");
        assert_eq!(scenario.deltas.start_delay_change, Some(12));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_glide_path_conserves_total_and_respects_floor(
            dom in 0u32..60,
            intl in 0u32..40,
            reduce in 0u32..20,
            every in 1u32..6,
            floor in 0u32..50,
            year in 0u32..40
        ) {
            let equity = (dom + intl) as f64;
            let rest = 100.0 - equity;
            let base = AssetAllocation::new(dom as f64, intl as f64, rest * 0.6, rest * 0.1, rest * 0.1, rest * 0.2);
            let shifted = apply_glide_path(&base, &glide(reduce as f64, every, floor as f64), year);
            prop_assert!((shifted.total() - base.total()).abs() < 1e-9);
            prop_assert!(shifted.equity() <= base.equity() + 1e-9);
            prop_assert!(shifted.equity() >= (floor as f64).min(base.equity()) - 1e-9);
        }
    }
}
