use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::adjust::NamedScenario;
use super::error::{EngineError, Result};
use super::rebalance::RebalancePreferences;
use super::recommend::{Goal, ProjectionResults};
use super::risk::RiskProfileResult;
use super::types::{AssetAllocation, ProjectionInputs, ScenarioComparison, SimulationResult};

pub const RISK_PROFILES_KEY: &str = "riskProfiles";
pub const LATEST_RISK_PROFILE_KEY: &str = "riskProfile.latest";
pub const PLAN_INDEX_KEY: &str = "portfolioPlans.index";
pub const FEEDBACK_KEY: &str = "portfolioReco.history";
pub const PROJECTIONS_KEY: &str = "microSim.savedPlans";
pub const LAST_INPUTS_KEY: &str = "microSim.lastInputs";
pub const WHAT_IF_PLANS_KEY: &str = "whatIf.plans";
pub const REBALANCE_KEY: &str = "rebalancePreferences";
pub const PLAN_VERSION: &str = "1.0.0";
pub const FEEDBACK_LIMIT: usize = 50;

const DEFAULT_PROFILE_NAME: &str = "My Risk Profile";
const DEFAULT_WHAT_IF_NAME: &str = "What-If Plan";
const REJECTION_WINDOW_DAYS: i64 = 30;
const REJECTIONS_FOR_TILT: usize = 3;
const REJECTION_EQUITY_TILT: f64 = -5.0;

pub fn plan_key(id: &str) -> String {
    format!("portfolioPlan.{id}")
}

/// String-keyed store holding JSON documents.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw).map(Some).map_err(|err| {
        warn!(key, error = %err, "stored record is not valid json");
        EngineError::from(err)
    })
}

fn write_json<T: Serialize>(store: &mut dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, raw).inspect_err(|err| {
        warn!(key, error = %err, "store write failed");
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRiskProfile {
    pub id: String,
    pub name: String,
    pub result: RiskProfileResult,
    pub created_at: DateTime<Utc>,
}

/// Appends to the saved list and replaces the latest profile. Returns the
/// new record id.
pub fn save_risk_profile(
    store: &mut dyn KeyValueStore,
    profile: &RiskProfileResult,
    name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<String> {
    let id = format!("profile_{}", now.timestamp_millis());
    let mut profiles = list_risk_profiles(store)?;
    profiles.push(SavedRiskProfile {
        id: id.clone(),
        name: name.unwrap_or(DEFAULT_PROFILE_NAME).to_string(),
        result: profile.clone(),
        created_at: now,
    });

    write_json(store, RISK_PROFILES_KEY, &profiles)?;
    write_json(store, LATEST_RISK_PROFILE_KEY, profile)?;
    Ok(id)
}

pub fn load_latest_risk_profile(store: &dyn KeyValueStore) -> Result<Option<RiskProfileResult>> {
    read_json(store, LATEST_RISK_PROFILE_KEY)
}

pub fn list_risk_profiles(store: &dyn KeyValueStore) -> Result<Vec<SavedRiskProfile>> {
    Ok(read_json(store, RISK_PROFILES_KEY)?.unwrap_or_default())
}

/// Plan contents supplied by the caller; id, timestamp and version are
/// assigned on save.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDraft {
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub goal: Goal,
    pub allocation: AssetAllocation,
    pub rationale: String,
    pub projection: ProjectionResults,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPlan {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub goal: Goal,
    pub allocation: AssetAllocation,
    pub rationale: String,
    pub projection: ProjectionResults,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanIndexEntry {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

pub fn save_plan(store: &mut dyn KeyValueStore, draft: PlanDraft, now: DateTime<Utc>) -> Result<String> {
    let id = format!("plan_{}", now.timestamp_millis());
    let plan = SavedPlan {
        id: id.clone(),
        name: draft.name,
        notes: draft.notes,
        goal: draft.goal,
        allocation: draft.allocation,
        rationale: draft.rationale,
        projection: draft.projection,
        timestamp: now,
        version: PLAN_VERSION.to_string(),
    };
    write_json(store, &plan_key(&id), &plan)?;

    let mut index = list_plans(store)?;
    index.push(PlanIndexEntry {
        id: id.clone(),
        name: plan.name,
        timestamp: now,
    });
    write_json(store, PLAN_INDEX_KEY, &index)?;
    Ok(id)
}

pub fn load_plan(store: &dyn KeyValueStore, id: &str) -> Result<Option<SavedPlan>> {
    read_json(store, &plan_key(id))
}

pub fn list_plans(store: &dyn KeyValueStore) -> Result<Vec<PlanIndexEntry>> {
    Ok(read_json(store, PLAN_INDEX_KEY)?.unwrap_or_default())
}

/// A projection run kept for a later re-run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedProjection {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub inputs: ProjectionInputs,
    pub result: SimulationResult,
}

/// Appends the run to the saved projections and remembers its inputs as
/// the last used. A blank name is rejected before anything is written.
pub fn save_projection(
    store: &mut dyn KeyValueStore,
    name: &str,
    description: Option<String>,
    inputs: &ProjectionInputs,
    result: &SimulationResult,
    now: DateTime<Utc>,
) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Store("a plan name is required".to_string()));
    }

    let id = format!("sim_{}", now.timestamp_millis());
    let mut saved = list_projections(store)?;
    saved.push(SavedProjection {
        id: id.clone(),
        name: name.to_string(),
        description,
        created_at: now,
        inputs: inputs.clone(),
        result: result.clone(),
    });

    write_json(store, PROJECTIONS_KEY, &saved)?;
    write_json(store, LAST_INPUTS_KEY, inputs)?;
    Ok(id)
}

pub fn list_projections(store: &dyn KeyValueStore) -> Result<Vec<SavedProjection>> {
    Ok(read_json(store, PROJECTIONS_KEY)?.unwrap_or_default())
}

pub fn load_last_inputs(store: &dyn KeyValueStore) -> Result<Option<ProjectionInputs>> {
    read_json(store, LAST_INPUTS_KEY)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedWhatIf {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub inputs: ProjectionInputs,
    pub scenarios: Vec<NamedScenario>,
    pub results: Vec<ScenarioComparison>,
}

pub fn save_what_if(
    store: &mut dyn KeyValueStore,
    name: Option<&str>,
    inputs: &ProjectionInputs,
    scenarios: &[NamedScenario],
    results: &[ScenarioComparison],
    now: DateTime<Utc>,
) -> Result<String> {
    let id = format!("whatif_{}", now.timestamp_millis());
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_WHAT_IF_NAME);

    let mut plans = list_what_if_plans(store)?;
    plans.push(SavedWhatIf {
        id: id.clone(),
        name: name.to_string(),
        timestamp: now,
        inputs: inputs.clone(),
        scenarios: scenarios.to_vec(),
        results: results.to_vec(),
    });
    write_json(store, WHAT_IF_PLANS_KEY, &plans)?;
    Ok(id)
}

pub fn list_what_if_plans(store: &dyn KeyValueStore) -> Result<Vec<SavedWhatIf>> {
    Ok(read_json(store, WHAT_IF_PLANS_KEY)?.unwrap_or_default())
}

pub fn save_rebalance_preferences(
    store: &mut dyn KeyValueStore,
    preferences: &RebalancePreferences,
) -> Result<()> {
    write_json(store, REBALANCE_KEY, preferences)
}

pub fn load_rebalance_preferences(store: &dyn KeyValueStore) -> Result<Option<RebalancePreferences>> {
    read_json(store, REBALANCE_KEY)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Accept,
    Reject,
    Modify,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub action: FeedbackAction,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

pub fn load_feedback(store: &dyn KeyValueStore) -> Result<Vec<FeedbackEntry>> {
    Ok(read_json(store, FEEDBACK_KEY)?.unwrap_or_default())
}

/// Appends an entry, keeping only the most recent [`FEEDBACK_LIMIT`].
pub fn record_feedback(
    store: &mut dyn KeyValueStore,
    action: FeedbackAction,
    plan_id: &str,
    metadata: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut history = load_feedback(store)?;
    history.push(FeedbackEntry {
        action,
        plan_id: plan_id.to_string(),
        metadata,
        timestamp: now,
    });
    if history.len() > FEEDBACK_LIMIT {
        history.drain(..history.len() - FEEDBACK_LIMIT);
    }
    write_json(store, FEEDBACK_KEY, &history)
}

/// Equity tilt in percentage points: negative once enough recent
/// recommendations were rejected.
pub fn adaptive_equity_tilt(history: &[FeedbackEntry], now: DateTime<Utc>) -> f64 {
    let cutoff = now - Duration::days(REJECTION_WINDOW_DAYS);
    let recent_rejects = history
        .iter()
        .filter(|entry| entry.action == FeedbackAction::Reject && entry.timestamp > cutoff)
        .count();

    if recent_rejects >= REJECTIONS_FOR_TILT {
        REJECTION_EQUITY_TILT
    } else {
        0.0
    }
}

pub fn export_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
