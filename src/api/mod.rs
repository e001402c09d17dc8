use axum::{
    Router,
    extract::{Json, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::{
    AllocationBand, AllocationOverride, AssetAllocation, ContributionInputs, ContributionPlan,
    ContributionSolveConfig, ContributionSolveResult, Driver, EngineError, FeedbackAction,
    Frequency, GlidePath, Goal, MarketAssumptions, MarketShock, MemoryStore, Milestone,
    MonteCarloConfig, MonteCarloResult, NamedScenario, PlanDraft, PlanIndexEntry,
    PortfolioRecommendation, Preferences, ProjectionInputs, ProjectionResults, RebalanceFrequency,
    RebalancePreferences, RiskProfileInput, RiskProfileResult, RoundUp, SavedPlan,
    SavedProjection, SavedWhatIf, Scenario, ScenarioComparison, ScenarioDeltas, ScenarioTables,
    SimulationResult, adaptive_equity_tilt, allocation_band, apply_scenario_deltas,
    compare_scenarios, effective_rates, estimate_milestones, list_plans, list_projections,
    list_what_if_plans, load_feedback, load_last_inputs, load_plan, load_rebalance_preferences,
    project_deterministic, project_monte_carlo, project_recommendation, recommend_portfolio,
    record_feedback, required_monthly_contribution, save_plan, save_projection,
    save_rebalance_preferences, save_risk_profile, save_what_if, score_risk_profile,
    solve_required_contribution, special_notes, top_drivers,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl From<CliFrequency> for Frequency {
    fn from(value: CliFrequency) -> Self {
        match value {
            CliFrequency::Daily => Frequency::Daily,
            CliFrequency::Weekly => Frequency::Weekly,
            CliFrequency::Monthly => Frequency::Monthly,
            CliFrequency::Quarterly => Frequency::Quarterly,
        }
    }
}

impl From<Frequency> for CliFrequency {
    fn from(value: Frequency) -> Self {
        match value {
            Frequency::Daily => CliFrequency::Daily,
            Frequency::Weekly => CliFrequency::Weekly,
            Frequency::Monthly => CliFrequency::Monthly,
            Frequency::Quarterly => CliFrequency::Quarterly,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliScenario {
    Low,
    Medium,
    High,
}

impl From<CliScenario> for Scenario {
    fn from(value: CliScenario) -> Self {
        match value {
            CliScenario::Low => Scenario::Low,
            CliScenario::Medium => Scenario::Medium,
            CliScenario::High => Scenario::High,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ApiScenario {
    Low,
    #[serde(alias = "base")]
    Medium,
    High,
}

impl From<ApiScenario> for CliScenario {
    fn from(value: ApiScenario) -> Self {
        match value {
            ApiScenario::Low => CliScenario::Low,
            ApiScenario::Medium => CliScenario::Medium,
            ApiScenario::High => CliScenario::High,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ProjectionMode {
    Deterministic,
    #[serde(alias = "monteCarlo", alias = "montecarlo")]
    MonteCarlo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    mode: Option<ProjectionMode>,
    simulations: Option<u32>,
    seed: Option<u64>,

    lump_sum: Option<f64>,
    contribution: Option<f64>,
    frequency: Option<Frequency>,
    start_delay_months: Option<u32>,
    escalation_rate: Option<f64>,
    skip_months_per_year: Option<u32>,
    round_up_tx_per_month: Option<f64>,
    round_up_tx_amount: Option<f64>,
    round_up_to: Option<f64>,
    round_up_multiplier: Option<f64>,
    years: Option<u32>,

    domestic_equity: Option<f64>,
    international_equity: Option<f64>,
    bonds: Option<f64>,
    reits: Option<f64>,
    gold: Option<f64>,
    cash: Option<f64>,

    scenario: Option<ApiScenario>,
    fees: Option<f64>,
    tax_drag: Option<f64>,
    inflation: Option<f64>,

    glide_reduce: Option<f64>,
    glide_every_years: Option<u32>,
    glide_floor: Option<f64>,
    shock_year: Option<u32>,
    shock_magnitude: Option<f64>,
    shock_recovery: Option<f64>,

    target_amount: Option<f64>,
    solve_success_rate: Option<f64>,
    what_if: Option<WhatIfPayload>,
    scenarios: Vec<WhatIfPayload>,
}

/// Assumption overrides in percent, like the top-level fields.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AssumptionsPayload {
    scenario: Option<ApiScenario>,
    fees: Option<f64>,
    tax_drag: Option<f64>,
    inflation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WhatIfPayload {
    name: Option<String>,
    contribution_change: Option<f64>,
    start_delay_change: Option<i32>,
    allocation_change: Option<AllocationOverride>,
    glide_path: Option<GlidePath>,
    shock: Option<MarketShock>,
    assumptions: Option<AssumptionsPayload>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nestegg",
    about = "Deterministic and Monte Carlo projections for a savings plan"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = ProjectionMode::Deterministic)]
    mode: ProjectionMode,
    #[arg(long, default_value_t = 1_000)]
    simulations: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 10_000.0)]
    lump_sum: f64,
    #[arg(long, default_value_t = 500.0, help = "Recurring contribution per period")]
    contribution: f64,
    #[arg(long, value_enum, default_value_t = CliFrequency::Monthly)]
    frequency: CliFrequency,
    #[arg(long, default_value_t = 0)]
    start_delay_months: u32,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual contribution escalation in percent, e.g. 5"
    )]
    escalation_rate: f64,
    #[arg(long, default_value_t = 0, help = "Months without contributions each year")]
    skip_months_per_year: u32,
    #[arg(long, default_value_t = 0.0, help = "Card purchases per month swept by round-ups")]
    round_up_tx_per_month: f64,
    #[arg(long, default_value_t = 0.0)]
    round_up_tx_amount: f64,
    #[arg(long, default_value_t = 1.0)]
    round_up_to: f64,
    #[arg(long, default_value_t = 1.0)]
    round_up_multiplier: f64,
    #[arg(long, default_value_t = 10)]
    years: u32,

    #[arg(long, default_value_t = 35.0, help = "Domestic equity weight in percent")]
    domestic_equity: f64,
    #[arg(long, default_value_t = 15.0)]
    international_equity: f64,
    #[arg(long, default_value_t = 30.0)]
    bonds: f64,
    #[arg(long, default_value_t = 8.0)]
    reits: f64,
    #[arg(long, default_value_t = 7.0)]
    gold: f64,
    #[arg(long, default_value_t = 5.0)]
    cash: f64,

    #[arg(long, value_enum, default_value_t = CliScenario::Medium)]
    scenario: CliScenario,
    #[arg(long, default_value_t = 0.5, help = "Annual fees in percent")]
    fees: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual tax drag in percent")]
    tax_drag: f64,
    #[arg(long, default_value_t = 2.5, help = "Annual inflation in percent")]
    inflation: f64,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Equity percentage points moved to defensive assets per glide step; 0 disables"
    )]
    glide_reduce: f64,
    #[arg(long, default_value_t = 5)]
    glide_every_years: u32,
    #[arg(long, default_value_t = 20.0, help = "Equity floor in percent")]
    glide_floor: f64,
    #[arg(long, help = "Projection year in which a market shock hits")]
    shock_year: Option<u32>,
    #[arg(long, default_value_t = -30.0, allow_hyphen_values = true, help = "Shock size in percent")]
    shock_magnitude: f64,
    #[arg(long, allow_hyphen_values = true, help = "Rebound in percent in the year after the shock")]
    shock_recovery: Option<f64>,

    #[arg(long, help = "Goal amount in today's money")]
    target_amount: Option<f64>,
    #[arg(
        long,
        help = "Solve for the contribution reaching the target with this success rate in percent"
    )]
    solve_success_rate: Option<f64>,
}

#[derive(Debug)]
struct SimulationRequest {
    inputs: ProjectionInputs,
    mode: ProjectionMode,
    monte_carlo: MonteCarloConfig,
    solve_success_rate: Option<f64>,
    what_if: Option<ScenarioDeltas>,
    scenarios: Vec<NamedScenario>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ProjectionOutput {
    Deterministic(SimulationResult),
    MonteCarlo(MonteCarloResult),
}

impl ProjectionOutput {
    fn summary(&self) -> &SimulationResult {
        match self {
            ProjectionOutput::Deterministic(result) => result,
            ProjectionOutput::MonteCarlo(result) => &result.summary,
        }
    }

    fn into_summary(self) -> SimulationResult {
        match self {
            ProjectionOutput::Deterministic(result) => result,
            ProjectionOutput::MonteCarlo(result) => result.summary,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    mode: ProjectionMode,
    net_return: f64,
    volatility: f64,
    result: ProjectionOutput,
    milestones: Vec<Milestone>,
    what_if: Option<ProjectionOutput>,
    comparisons: Vec<ScenarioComparison>,
    contribution_solve: Option<ContributionSolveResult>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn check_percent(flag: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(format!("--{flag} must be between 0 and 100"));
    }
    Ok(())
}

fn build_inputs(cli: Cli) -> Result<SimulationRequest, String> {
    if cli.mode == ProjectionMode::MonteCarlo && cli.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if cli.years > 100 {
        return Err("--years must be <= 100".to_string());
    }

    if !cli.lump_sum.is_finite() || cli.lump_sum < 0.0 {
        return Err("--lump-sum must be >= 0".to_string());
    }

    if !cli.contribution.is_finite() || cli.contribution < 0.0 {
        return Err("--contribution must be >= 0".to_string());
    }

    if cli.skip_months_per_year > 12 {
        return Err("--skip-months-per-year must be <= 12".to_string());
    }

    if !cli.escalation_rate.is_finite() || cli.escalation_rate <= -100.0 {
        return Err("--escalation-rate must be > -100".to_string());
    }

    let round_up = if cli.round_up_tx_per_month > 0.0 {
        if !cli.round_up_to.is_finite() || cli.round_up_to <= 0.0 {
            return Err("--round-up-to must be > 0 when round-ups are enabled".to_string());
        }
        if !cli.round_up_multiplier.is_finite() || cli.round_up_multiplier < 0.0 {
            return Err("--round-up-multiplier must be >= 0".to_string());
        }
        Some(RoundUp {
            avg_tx_per_month: cli.round_up_tx_per_month,
            avg_tx_amount: cli.round_up_tx_amount,
            round_up_to: cli.round_up_to,
            multiplier: cli.round_up_multiplier,
        })
    } else {
        None
    };

    let weights = [
        ("domestic-equity", cli.domestic_equity),
        ("international-equity", cli.international_equity),
        ("bonds", cli.bonds),
        ("reits", cli.reits),
        ("gold", cli.gold),
        ("cash", cli.cash),
    ];
    for (flag, weight) in weights {
        check_percent(flag, weight)?;
    }
    let allocation = AssetAllocation::new(
        cli.domestic_equity,
        cli.international_equity,
        cli.bonds,
        cli.reits,
        cli.gold,
        cli.cash,
    );
    if (allocation.total() - 100.0).abs() >= 0.1 {
        return Err(format!(
            "allocation weights must sum to 100, got {:.2}",
            allocation.total()
        ));
    }

    check_percent("fees", cli.fees)?;
    check_percent("tax-drag", cli.tax_drag)?;
    if !cli.inflation.is_finite() || cli.inflation <= -100.0 {
        return Err("--inflation must be > -100".to_string());
    }

    if !cli.glide_reduce.is_finite() || cli.glide_reduce < 0.0 {
        return Err("--glide-reduce must be >= 0".to_string());
    }
    let glide_enabled = cli.glide_reduce > 0.0;
    if glide_enabled && cli.glide_every_years == 0 {
        return Err("--glide-every-years must be > 0".to_string());
    }
    check_percent("glide-floor", cli.glide_floor)?;

    let shock = match cli.shock_year {
        Some(year) => {
            if year == 0 || year > cli.years {
                return Err("--shock-year must be between 1 and --years".to_string());
            }
            if !cli.shock_magnitude.is_finite() || cli.shock_magnitude <= -100.0 {
                return Err("--shock-magnitude must be > -100".to_string());
            }
            if cli
                .shock_recovery
                .is_some_and(|r| !r.is_finite() || r <= -100.0)
            {
                return Err("--shock-recovery must be > -100".to_string());
            }
            MarketShock {
                enabled: true,
                year,
                magnitude_percent: cli.shock_magnitude,
                recovery_percent: cli.shock_recovery,
            }
        }
        None => MarketShock::default(),
    };

    if cli
        .target_amount
        .is_some_and(|target| !target.is_finite() || target <= 0.0)
    {
        return Err("--target-amount must be > 0".to_string());
    }

    if let Some(rate) = cli.solve_success_rate {
        if cli.target_amount.is_none() {
            return Err("--solve-success-rate requires --target-amount".to_string());
        }
        check_percent("solve-success-rate", rate)?;
        if cli.simulations == 0 {
            return Err("--simulations must be > 0".to_string());
        }
    }

    let inputs = ProjectionInputs {
        lump_sum: cli.lump_sum,
        contribution: ContributionInputs {
            amount: cli.contribution,
            frequency: cli.frequency.into(),
            start_delay_months: cli.start_delay_months,
            annual_escalation_percent: cli.escalation_rate,
            skip_months_per_year: cli.skip_months_per_year,
            round_up,
        },
        duration_years: cli.years,
        allocation,
        assumptions: MarketAssumptions {
            scenario: cli.scenario.into(),
            fees: cli.fees / 100.0,
            tax_drag: cli.tax_drag / 100.0,
            inflation: cli.inflation / 100.0,
        },
        glide_path: GlidePath {
            enabled: glide_enabled,
            reduce_equity_percent_per_step: cli.glide_reduce,
            every_years: cli.glide_every_years,
            floor_percent: cli.glide_floor,
        },
        shock,
        target_amount: cli.target_amount,
    };

    Ok(SimulationRequest {
        inputs,
        mode: cli.mode,
        monte_carlo: MonteCarloConfig {
            num_simulations: cli.simulations,
            seed: cli.seed,
        },
        solve_success_rate: cli.solve_success_rate.map(|r| r / 100.0),
        what_if: None,
        scenarios: Vec::new(),
    })
}

/// Overlays a what-if on the baseline flags and runs it through
/// `build_inputs`, so overrides share the baseline's units and checks. The
/// returned deltas carry the converted values.
fn scenario_deltas(base: &Cli, what_if: &WhatIfPayload) -> Result<ScenarioDeltas, String> {
    if what_if
        .contribution_change
        .is_some_and(|change| !change.is_finite() || change < -100.0)
    {
        return Err("--contribution-change must be >= -100".to_string());
    }

    let mut cli = base.clone();
    if let Some(change) = what_if.contribution_change {
        cli.contribution *= 1.0 + change / 100.0;
    }
    if let Some(change) = what_if.start_delay_change {
        let delay = (i64::from(cli.start_delay_months) + i64::from(change)).max(0);
        cli.start_delay_months = u32::try_from(delay).unwrap_or(u32::MAX);
    }
    if let Some(over) = what_if.allocation_change {
        cli.domestic_equity = over.domestic_equity.unwrap_or(cli.domestic_equity);
        cli.international_equity = over.international_equity.unwrap_or(cli.international_equity);
        cli.bonds = over.bonds.unwrap_or(cli.bonds);
        cli.reits = over.reits.unwrap_or(cli.reits);
        cli.gold = over.gold.unwrap_or(cli.gold);
        cli.cash = over.cash.unwrap_or(cli.cash);
    }
    if let Some(glide) = what_if.glide_path {
        cli.glide_reduce = if glide.enabled {
            glide.reduce_equity_percent_per_step
        } else {
            0.0
        };
        cli.glide_every_years = glide.every_years;
        cli.glide_floor = glide.floor_percent;
    }
    if let Some(shock) = what_if.shock {
        cli.shock_year = shock.enabled.then_some(shock.year);
        cli.shock_magnitude = shock.magnitude_percent;
        cli.shock_recovery = shock.recovery_percent;
    }
    if let Some(assumptions) = &what_if.assumptions {
        if let Some(v) = assumptions.scenario {
            cli.scenario = v.into();
        }
        if let Some(v) = assumptions.fees {
            cli.fees = v;
        }
        if let Some(v) = assumptions.tax_drag {
            cli.tax_drag = v;
        }
        if let Some(v) = assumptions.inflation {
            cli.inflation = v;
        }
    }

    let built = build_inputs(cli)?.inputs;
    Ok(ScenarioDeltas {
        contribution_change: what_if.contribution_change,
        start_delay_change: what_if.start_delay_change,
        allocation_change: what_if.allocation_change,
        glide_path: what_if.glide_path.map(|_| built.glide_path),
        shock: what_if.shock.map(|_| built.shock),
        assumptions: what_if.assumptions.as_ref().map(|_| built.assumptions.clone()),
    })
}

fn project(
    inputs: &ProjectionInputs,
    mode: ProjectionMode,
    config: &MonteCarloConfig,
    tables: &ScenarioTables,
) -> Result<ProjectionOutput, EngineError> {
    Ok(match mode {
        ProjectionMode::Deterministic => {
            ProjectionOutput::Deterministic(project_deterministic(inputs, tables))
        }
        ProjectionMode::MonteCarlo => {
            ProjectionOutput::MonteCarlo(project_monte_carlo(inputs, config, tables)?)
        }
    })
}

fn run_simulation(request: &SimulationRequest) -> Result<SimulateResponse, EngineError> {
    let tables = ScenarioTables::default();
    let inputs = &request.inputs;
    let (net_return, volatility) = effective_rates(&inputs.allocation, &inputs.assumptions, &tables);

    let result = project(inputs, request.mode, &request.monte_carlo, &tables)?;
    let summary = result.summary();
    let milestones = estimate_milestones(summary.monthly_contribution, net_return, inputs.lump_sum);

    let what_if = match &request.what_if {
        Some(deltas) => {
            let changed = apply_scenario_deltas(inputs, deltas);
            Some(project(&changed, request.mode, &request.monte_carlo, &tables)?)
        }
        None => None,
    };

    let comparisons = compare_scenarios(inputs, summary, &request.scenarios, |changed| {
        project(changed, request.mode, &request.monte_carlo, &tables).map(ProjectionOutput::into_summary)
    })?;

    let contribution_solve = match request.solve_success_rate {
        Some(target_success_rate) => {
            let search_max = (summary.monthly_contribution * 10.0)
                .max(inputs.target_amount.unwrap_or(0.0) / 12.0)
                .max(1.0);
            let config = ContributionSolveConfig {
                target_success_rate,
                search_min: 0.0,
                search_max,
                tolerance: 1.0,
                max_iterations: 40,
                simulation: request.monte_carlo,
            };
            Some(solve_required_contribution(inputs, config, &tables)?)
        }
        None => None,
    };

    Ok(SimulateResponse {
        mode: request.mode,
        net_return,
        volatility,
        result,
        milestones,
        what_if,
        comparisons,
        contribution_solve,
    })
}

/// One-shot projection for the command line, rendered as pretty JSON.
pub fn run_cli(cli: Cli) -> Result<String, String> {
    let request = build_inputs(cli)?;
    let response = run_simulation(&request).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&response).map_err(|e| e.to_string())
}

#[derive(Clone, Default)]
struct AppState {
    store: Arc<Mutex<MemoryStore>>,
}

impl AppState {
    fn store(&self) -> Result<MutexGuard<'_, MemoryStore>, Response> {
        self.store.lock().map_err(|_| {
            warn!("store lock poisoned");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store unavailable")
        })
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/risk-profile", post(risk_profile_handler))
        .route("/api/recommend", post(recommend_handler))
        .route("/api/plans", get(list_plans_handler).post(save_plan_handler))
        .route("/api/plans/:id", get(load_plan_handler))
        .route("/api/feedback", post(feedback_handler))
        .route(
            "/api/projections",
            get(list_projections_handler).post(save_projection_handler),
        )
        .route("/api/projections/last-inputs", get(last_inputs_handler))
        .route(
            "/api/what-if/plans",
            get(list_what_if_plans_handler).post(save_what_if_plan_handler),
        )
        .route(
            "/api/rebalance",
            get(load_rebalance_handler).post(save_rebalance_handler),
        )
        .route("/api/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState::default());

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "projection API listening");
    info!("local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    info!(
        mode = ?request.mode,
        years = request.inputs.duration_years,
        simulations = request.monte_carlo.num_simulations,
        "simulate request"
    );

    match run_simulation(&request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiskProfileRequest {
    answers: BTreeMap<String, u8>,
    #[serde(default)]
    save: bool,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RiskProfileResponse {
    result: RiskProfileResult,
    allocation_band: AllocationBand,
    special_notes: Vec<String>,
    top_drivers: Vec<Driver>,
    profile_id: Option<String>,
}

async fn risk_profile_handler(
    State(state): State<AppState>,
    Json(request): Json<RiskProfileRequest>,
) -> Response {
    let result = match score_risk_profile(&request.answers) {
        Ok(result) => result,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    info!(
        overall = result.overall,
        investor_type = result.investor_type.label(),
        "risk profile scored"
    );

    let profile_id = if request.save {
        let mut store = match state.store() {
            Ok(store) => store,
            Err(response) => return response,
        };
        match save_risk_profile(&mut *store, &result, request.name.as_deref(), Utc::now()) {
            Ok(id) => Some(id),
            Err(err) => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
            }
        }
    } else {
        None
    };

    json_response(
        StatusCode::OK,
        RiskProfileResponse {
            allocation_band: allocation_band(result.investor_type),
            special_notes: special_notes(&result.dimensions),
            top_drivers: top_drivers(&result.dimensions),
            result,
            profile_id,
        },
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendRequest {
    risk_profile: RiskProfileInput,
    goal: Goal,
    contribution: ContributionPlan,
    #[serde(default)]
    preferences: Preferences,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendResponse {
    recommendation: PortfolioRecommendation,
    projection: ProjectionResults,
    required_monthly: Option<f64>,
    adaptive_equity_tilt: f64,
}

fn build_recommendation(request: &RecommendRequest, equity_tilt: f64) -> RecommendResponse {
    let recommendation = recommend_portfolio(
        &request.risk_profile,
        &request.goal,
        &request.contribution,
        &request.preferences,
    );
    let tables = ScenarioTables::recommendation();
    let years = request.goal.time_horizon_years;
    let lump = request.contribution.current_lump_sum;
    let projection = project_recommendation(
        &recommendation.allocation,
        lump,
        request.contribution.monthly_contribution,
        years,
        &tables,
    );

    let required_monthly = request.goal.target_amount.map(|target| {
        let (net, _) = effective_rates(
            &recommendation.allocation,
            &MarketAssumptions::default(),
            &tables,
        );
        required_monthly_contribution(target, lump, years, net)
    });

    RecommendResponse {
        recommendation,
        projection,
        required_monthly,
        adaptive_equity_tilt: equity_tilt,
    }
}

async fn recommend_handler(
    State(state): State<AppState>,
    Json(request): Json<RecommendRequest>,
) -> Response {
    let problems = request.goal.validate();
    if !problems.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &problems.join("; "));
    }

    let equity_tilt = {
        let store = match state.store() {
            Ok(store) => store,
            Err(response) => return response,
        };
        match load_feedback(&*store) {
            Ok(history) => adaptive_equity_tilt(&history, Utc::now()),
            Err(err) => {
                warn!(error = %err, "feedback history unreadable");
                0.0
            }
        }
    };

    info!(
        investor_type = request.risk_profile.investor_type().label(),
        horizon = request.goal.time_horizon_years,
        "recommend request"
    );
    json_response(StatusCode::OK, build_recommendation(&request, equity_tilt))
}

#[derive(Debug, Serialize)]
struct SavedId {
    id: String,
}

async fn save_plan_handler(State(state): State<AppState>, Json(draft): Json<PlanDraft>) -> Response {
    let mut store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match save_plan(&mut *store, draft, Utc::now()) {
        Ok(id) => json_response(StatusCode::CREATED, SavedId { id }),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn list_plans_handler(State(state): State<AppState>) -> Response {
    let store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match list_plans(&*store) {
        Ok(index) => json_response::<Vec<PlanIndexEntry>>(StatusCode::OK, index),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn load_plan_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match load_plan(&*store, &id) {
        Ok(Some(plan)) => json_response::<SavedPlan>(StatusCode::OK, plan),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Plan not found"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackRequest {
    action: FeedbackAction,
    plan_id: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

async fn feedback_handler(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Response {
    let mut store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match record_feedback(
        &mut *store,
        request.action,
        &request.plan_id,
        request.metadata,
        Utc::now(),
    ) {
        Ok(()) => json_response(StatusCode::OK, serde_json::json!({ "recorded": true })),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveProjectionRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    simulation: SimulatePayload,
}

async fn save_projection_handler(
    State(state): State<AppState>,
    Json(request): Json<SaveProjectionRequest>,
) -> Response {
    if request.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name is required");
    }
    let simulation = match api_request_from_payload(request.simulation) {
        Ok(simulation) => simulation,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let response = match run_simulation(&simulation) {
        Ok(response) => response,
        Err(err) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    };

    let mut store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match save_projection(
        &mut *store,
        &request.name,
        request.description,
        &simulation.inputs,
        response.result.summary(),
        Utc::now(),
    ) {
        Ok(id) => {
            debug!(%id, entries = store.len(), "projection saved");
            json_response(StatusCode::CREATED, SavedId { id })
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn list_projections_handler(State(state): State<AppState>) -> Response {
    let store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match list_projections(&*store) {
        Ok(saved) => json_response::<Vec<SavedProjection>>(StatusCode::OK, saved),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn last_inputs_handler(State(state): State<AppState>) -> Response {
    let store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match load_last_inputs(&*store) {
        Ok(Some(inputs)) => json_response::<ProjectionInputs>(StatusCode::OK, inputs),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No saved inputs"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveWhatIfRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    simulation: SimulatePayload,
}

#[derive(Debug, Serialize)]
struct SavedWhatIfResponse {
    id: String,
    comparisons: Vec<ScenarioComparison>,
}

async fn save_what_if_plan_handler(
    State(state): State<AppState>,
    Json(request): Json<SaveWhatIfRequest>,
) -> Response {
    let simulation = match api_request_from_payload(request.simulation) {
        Ok(simulation) => simulation,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let response = match run_simulation(&simulation) {
        Ok(response) => response,
        Err(err) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    };
    info!(scenarios = simulation.scenarios.len(), "what-if plan request");

    let mut store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match save_what_if(
        &mut *store,
        request.name.as_deref(),
        &simulation.inputs,
        &simulation.scenarios,
        &response.comparisons,
        Utc::now(),
    ) {
        Ok(id) => {
            debug!(%id, entries = store.len(), "what-if plan saved");
            json_response(
                StatusCode::CREATED,
                SavedWhatIfResponse {
                    id,
                    comparisons: response.comparisons,
                },
            )
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn list_what_if_plans_handler(State(state): State<AppState>) -> Response {
    let store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match list_what_if_plans(&*store) {
        Ok(plans) => json_response::<Vec<SavedWhatIf>>(StatusCode::OK, plans),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RebalanceRequest {
    #[serde(default)]
    frequency: RebalanceFrequency,
    #[serde(default)]
    auto_reminders: bool,
    #[serde(default)]
    last_rebalance: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RebalanceResponse {
    #[serde(flatten)]
    preferences: RebalancePreferences,
    description: &'static str,
    due: bool,
}

fn rebalance_response(preferences: RebalancePreferences, today: NaiveDate) -> RebalanceResponse {
    RebalanceResponse {
        description: preferences.frequency.description(),
        due: preferences.is_due(today),
        preferences,
    }
}

async fn load_rebalance_handler(State(state): State<AppState>) -> Response {
    let today = Utc::now().date_naive();
    let store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match load_rebalance_preferences(&*store) {
        Ok(saved) => {
            let preferences = saved.unwrap_or_else(|| {
                RebalancePreferences::new(RebalanceFrequency::default(), false, None, today)
            });
            json_response(StatusCode::OK, rebalance_response(preferences, today))
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn save_rebalance_handler(
    State(state): State<AppState>,
    Json(request): Json<RebalanceRequest>,
) -> Response {
    let today = Utc::now().date_naive();
    let preferences = RebalancePreferences::new(
        request.frequency,
        request.auto_reminders,
        request.last_rebalance,
        today,
    );
    info!(
        frequency = ?preferences.frequency,
        next = %preferences.next_rebalance,
        "rebalance preferences"
    );

    let mut store = match state.store() {
        Ok(store) => store,
        Err(response) => return response,
    };
    match save_rebalance_preferences(&mut *store, &preferences) {
        Ok(()) => json_response(StatusCode::OK, rebalance_response(preferences, today)),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<SimulationRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<SimulationRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.mode {
        cli.mode = v;
    }
    if let Some(v) = payload.simulations {
        cli.simulations = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    if let Some(v) = payload.lump_sum {
        cli.lump_sum = v;
    }
    if let Some(v) = payload.contribution {
        cli.contribution = v;
    }
    if let Some(v) = payload.frequency {
        cli.frequency = v.into();
    }
    if let Some(v) = payload.start_delay_months {
        cli.start_delay_months = v;
    }
    if let Some(v) = payload.escalation_rate {
        cli.escalation_rate = v;
    }
    if let Some(v) = payload.skip_months_per_year {
        cli.skip_months_per_year = v;
    }
    if let Some(v) = payload.round_up_tx_per_month {
        cli.round_up_tx_per_month = v;
    }
    if let Some(v) = payload.round_up_tx_amount {
        cli.round_up_tx_amount = v;
    }
    if let Some(v) = payload.round_up_to {
        cli.round_up_to = v;
    }
    if let Some(v) = payload.round_up_multiplier {
        cli.round_up_multiplier = v;
    }
    if let Some(v) = payload.years {
        cli.years = v;
    }

    if let Some(v) = payload.domestic_equity {
        cli.domestic_equity = v;
    }
    if let Some(v) = payload.international_equity {
        cli.international_equity = v;
    }
    if let Some(v) = payload.bonds {
        cli.bonds = v;
    }
    if let Some(v) = payload.reits {
        cli.reits = v;
    }
    if let Some(v) = payload.gold {
        cli.gold = v;
    }
    if let Some(v) = payload.cash {
        cli.cash = v;
    }

    if let Some(v) = payload.scenario {
        cli.scenario = v.into();
    }
    if let Some(v) = payload.fees {
        cli.fees = v;
    }
    if let Some(v) = payload.tax_drag {
        cli.tax_drag = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation = v;
    }

    if let Some(v) = payload.glide_reduce {
        cli.glide_reduce = v;
    }
    if let Some(v) = payload.glide_every_years {
        cli.glide_every_years = v;
    }
    if let Some(v) = payload.glide_floor {
        cli.glide_floor = v;
    }
    if payload.shock_year.is_some() {
        cli.shock_year = payload.shock_year;
    }
    if let Some(v) = payload.shock_magnitude {
        cli.shock_magnitude = v;
    }
    if payload.shock_recovery.is_some() {
        cli.shock_recovery = payload.shock_recovery;
    }

    if payload.target_amount.is_some() {
        cli.target_amount = payload.target_amount;
    }
    if payload.solve_success_rate.is_some() {
        cli.solve_success_rate = payload.solve_success_rate;
    }

    let strip_flags = |e: String| e.replace("--", "");
    let base = cli.clone();
    let mut request = build_inputs(cli).map_err(strip_flags)?;

    request.what_if = payload
        .what_if
        .as_ref()
        .map(|what_if| scenario_deltas(&base, what_if))
        .transpose()
        .map_err(|e| format!("whatIf: {}", strip_flags(e)))?;

    request.scenarios = payload
        .scenarios
        .iter()
        .enumerate()
        .map(|(i, what_if)| {
            let deltas = scenario_deltas(&base, what_if)
                .map_err(|e| format!("scenarios[{i}]: {}", strip_flags(e)))?;
            let name = what_if
                .name
                .clone()
                .unwrap_or_else(|| format!("Scenario {}", i + 1));
            Ok(NamedScenario { name, deltas })
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(request)
}

fn default_cli_for_api() -> Cli {
    Cli {
        mode: ProjectionMode::Deterministic,
        simulations: 1_000,
        seed: 42,
        lump_sum: 10_000.0,
        contribution: 500.0,
        frequency: CliFrequency::Monthly,
        start_delay_months: 0,
        escalation_rate: 0.0,
        skip_months_per_year: 0,
        round_up_tx_per_month: 0.0,
        round_up_tx_amount: 0.0,
        round_up_to: 1.0,
        round_up_multiplier: 1.0,
        years: 10,
        domestic_equity: 35.0,
        international_equity: 15.0,
        bonds: 30.0,
        reits: 8.0,
        gold: 7.0,
        cash: 5.0,
        scenario: CliScenario::Medium,
        fees: 0.5,
        tax_drag: 0.0,
        inflation: 2.5,
        glide_reduce: 0.0,
        glide_every_years: 5,
        glide_floor: 20.0,
        shock_year: None,
        shock_magnitude: -30.0,
        shock_recovery: None,
        target_amount: None,
        solve_success_rate: None,
    }
}
