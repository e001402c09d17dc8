mod adjust;
mod contribution;
mod engine;
mod error;
mod random;
mod rebalance;
mod recommend;
mod returns;
mod risk;
mod solver;
mod store;
mod types;

pub use adjust::{
    AllocationOverride, NamedScenario, ScenarioDeltas, apply_glide_path, apply_scenario_deltas,
    compare_scenarios,
};
pub use contribution::{ContributionSchedule, round_up_contribution, to_monthly, total_monthly};
pub use engine::{
    future_value_annuity, future_value_lump_sum, project_deterministic, project_monte_carlo,
    project_monte_carlo_with_cancel,
};
pub use error::{EngineError, Result};
pub use random::{Rng, derive_seed};
pub use rebalance::{RebalanceFrequency, RebalancePreferences, next_rebalance_date};
pub use recommend::{
    Confidence, ContributionPlan, Goal, GoalPriority, GoalType, ManualProfile,
    PortfolioRecommendation, Preferences, ProjectionResults, RiskProfileInput, ScenarioProjection,
    SuggestedInstruments, base_allocation, normalize_allocation, project_recommendation,
    recommend_portfolio,
};
pub use returns::{
    AssetReturn, PortfolioStats, ReturnTable, Scenario, ScenarioTables, effective_rates,
    net_return, portfolio_stats,
};
pub use risk::{
    AllocationBand, DimensionScore, Driver, InvestorType, QUESTIONS, RiskDimension,
    RiskProfileResult, RiskQuestion, allocation_band, score_risk_profile, score_risk_profile_at,
    special_notes, top_drivers,
};
pub use solver::{
    ContributionSolveConfig, ContributionSolveIteration, ContributionSolveResult, Milestone,
    estimate_milestones, required_monthly_contribution, solve_required_contribution,
};
pub use store::{
    FeedbackAction, FeedbackEntry, KeyValueStore, MemoryStore, PlanDraft, PlanIndexEntry,
    SavedPlan, SavedProjection, SavedRiskProfile, SavedWhatIf, adaptive_equity_tilt, export_json,
    list_plans, list_projections, list_risk_profiles, list_what_if_plans, load_feedback,
    load_last_inputs, load_latest_risk_profile, load_plan, load_rebalance_preferences,
    record_feedback, save_plan, save_projection, save_rebalance_preferences, save_risk_profile,
    save_what_if,
};
pub use types::{
    AssetAllocation, AssetClass, ContributionInputs, FinalStats, Frequency, GlidePath, GoalOutcome,
    MAX_DURATION_YEARS, MarketAssumptions, MarketShock, MonteCarloConfig, MonteCarloResult,
    PercentileBand, ProjectionInputs, RoundUp, ScenarioComparison, SimulationResult,
    YearlySnapshot,
};
