use serde::{Deserialize, Serialize};

use super::types::{AssetAllocation, AssetClass, MarketAssumptions};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetReturn {
    pub mean: f64,
    pub volatility: f64,
}

impl AssetReturn {
    pub const fn new(mean: f64, volatility: f64) -> Self {
        Self { mean, volatility }
    }
}

/// Annual return assumptions, one entry per asset class.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnTable {
    pub domestic_equity: AssetReturn,
    pub international_equity: AssetReturn,
    pub bonds: AssetReturn,
    pub reits: AssetReturn,
    pub gold: AssetReturn,
    pub cash: AssetReturn,
}

impl ReturnTable {
    pub fn get(&self, asset: AssetClass) -> AssetReturn {
        match asset {
            AssetClass::DomesticEquity => self.domestic_equity,
            AssetClass::InternationalEquity => self.international_equity,
            AssetClass::Bonds => self.bonds,
            AssetClass::Reits => self.reits,
            AssetClass::Gold => self.gold,
            AssetClass::Cash => self.cash,
        }
    }

    /// Every asset shares the same vol; handy for pinning stochastic spread.
    #[cfg(test)]
    pub fn with_volatility(mut self, volatility: f64) -> Self {
        for asset in [
            &mut self.domestic_equity,
            &mut self.international_equity,
            &mut self.bonds,
            &mut self.reits,
            &mut self.gold,
            &mut self.cash,
        ] {
            asset.volatility = volatility;
        }
        self
    }

    const fn from_means(means: [f64; 6]) -> Self {
        Self {
            domestic_equity: AssetReturn::new(means[0], 0.18),
            international_equity: AssetReturn::new(means[1], 0.20),
            bonds: AssetReturn::new(means[2], 0.08),
            reits: AssetReturn::new(means[3], 0.22),
            gold: AssetReturn::new(means[4], 0.15),
            cash: AssetReturn::new(means[5], 0.01),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Low,
    Medium,
    High,
    Custom(ReturnTable),
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTables {
    pub low: ReturnTable,
    pub medium: ReturnTable,
    pub high: ReturnTable,
}

impl Default for ScenarioTables {
    fn default() -> Self {
        Self {
            low: ReturnTable::from_means([0.06, 0.05, 0.03, 0.04, 0.02, 0.015]),
            medium: ReturnTable::from_means([0.08, 0.07, 0.04, 0.06, 0.03, 0.02]),
            high: ReturnTable::from_means([0.10, 0.09, 0.05, 0.08, 0.04, 0.025]),
        }
    }
}

impl ScenarioTables {
    /// Wider spread used when projecting a recommended portfolio.
    pub fn recommendation() -> Self {
        Self {
            low: ReturnTable::from_means([0.04, 0.03, 0.01, 0.03, -0.01, 0.005]),
            medium: ReturnTable::from_means([0.08, 0.07, 0.04, 0.06, 0.03, 0.02]),
            high: ReturnTable::from_means([0.12, 0.10, 0.06, 0.09, 0.06, 0.03]),
        }
    }

    pub fn resolve(&self, scenario: &Scenario) -> ReturnTable {
        match scenario {
            Scenario::Low => self.low,
            Scenario::Medium => self.medium,
            Scenario::High => self.high,
            Scenario::Custom(table) => *table,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStats {
    pub expected_return: f64,
    pub volatility: f64,
}

/// Weighted mean return and volatility. Cross-asset correlation is taken as
/// zero, so variance is the sum of squared weighted vols.
pub fn portfolio_stats(allocation: &AssetAllocation, table: &ReturnTable) -> PortfolioStats {
    let mut expected_return = 0.0;
    let mut variance = 0.0;
    for asset in AssetClass::ALL {
        let weight = allocation.weight(asset) / 100.0;
        let assumption = table.get(asset);
        expected_return += weight * assumption.mean;
        variance += (weight * assumption.volatility).powi(2);
    }

    PortfolioStats {
        expected_return,
        volatility: variance.sqrt(),
    }
}

pub fn net_return(stats: &PortfolioStats, assumptions: &MarketAssumptions) -> f64 {
    stats.expected_return - assumptions.fees - assumptions.tax_drag
}

/// Net annual return and volatility for an allocation under the given
/// assumptions.
pub fn effective_rates(
    allocation: &AssetAllocation,
    assumptions: &MarketAssumptions,
    tables: &ScenarioTables,
) -> (f64, f64) {
    let table = tables.resolve(&assumptions.scenario);
    let stats = portfolio_stats(allocation, &table);
    (net_return(&stats, assumptions), stats.volatility)
}
