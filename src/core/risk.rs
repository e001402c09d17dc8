use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

pub const PROFILE_VERSION: &str = "1.0";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskDimension {
    Tolerance,
    Capacity,
    Horizon,
    Liquidity,
    Knowledge,
    LossAversion,
}

impl RiskDimension {
    pub const ALL: [RiskDimension; 6] = [
        RiskDimension::Tolerance,
        RiskDimension::Capacity,
        RiskDimension::Horizon,
        RiskDimension::Liquidity,
        RiskDimension::Knowledge,
        RiskDimension::LossAversion,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RiskDimension::Tolerance => "Risk Tolerance",
            RiskDimension::Capacity => "Risk Capacity",
            RiskDimension::Horizon => "Time Horizon",
            RiskDimension::Liquidity => "Liquidity Needs",
            RiskDimension::Knowledge => "Investment Knowledge",
            RiskDimension::LossAversion => "Loss Tolerance",
        }
    }

    pub fn weight(self) -> f64 {
        match self {
            RiskDimension::Tolerance => 0.35,
            RiskDimension::Capacity => 0.25,
            RiskDimension::Horizon => 0.15,
            RiskDimension::Liquidity => 0.10,
            RiskDimension::Knowledge => 0.10,
            RiskDimension::LossAversion => 0.05,
        }
    }

    /// Agreement with these questions signals *lower* risk appetite.
    pub fn reverse_scored(self) -> bool {
        matches!(self, RiskDimension::Liquidity | RiskDimension::LossAversion)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct RiskQuestion {
    pub id: &'static str,
    pub dimension: RiskDimension,
    pub text: &'static str,
}

pub const QUESTIONS: [RiskQuestion; 12] = [
    RiskQuestion {
        id: "Q1",
        dimension: RiskDimension::Tolerance,
        text: "If my investments drop 10% in a month, I would stay invested.",
    },
    RiskQuestion {
        id: "Q2",
        dimension: RiskDimension::Tolerance,
        text: "I'm comfortable with high short-term volatility for higher long-term gains.",
    },
    RiskQuestion {
        id: "Q3",
        dimension: RiskDimension::Capacity,
        text: "My monthly income is stable and predictable.",
    },
    RiskQuestion {
        id: "Q4",
        dimension: RiskDimension::Capacity,
        text: "I have an emergency fund covering at least 3-6 months of expenses.",
    },
    RiskQuestion {
        id: "Q5",
        dimension: RiskDimension::Horizon,
        text: "I won't need this money for at least 5 years.",
    },
    RiskQuestion {
        id: "Q6",
        dimension: RiskDimension::Horizon,
        text: "I'm investing primarily for long-term goals (e.g., retirement).",
    },
    RiskQuestion {
        id: "Q7",
        dimension: RiskDimension::Liquidity,
        text: "I might need to withdraw part of this money within the next 12 months.",
    },
    RiskQuestion {
        id: "Q8",
        dimension: RiskDimension::Liquidity,
        text: "Quick access to my invested funds is important to me.",
    },
    RiskQuestion {
        id: "Q9",
        dimension: RiskDimension::Knowledge,
        text: "I understand diversification, ETFs, and risk vs return.",
    },
    RiskQuestion {
        id: "Q10",
        dimension: RiskDimension::Knowledge,
        text: "I've previously invested in equities, mutual funds, or ETFs.",
    },
    RiskQuestion {
        id: "Q11",
        dimension: RiskDimension::LossAversion,
        text: "I prefer a guaranteed small return over a risky higher return.",
    },
    RiskQuestion {
        id: "Q12",
        dimension: RiskDimension::LossAversion,
        text: "A temporary 20% drop would make me sell to 'stop the loss'.",
    },
];

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum InvestorType {
    #[serde(rename = "Very Conservative")]
    VeryConservative,
    Conservative,
    Balanced,
    Growth,
    Aggressive,
}

impl InvestorType {
    pub const ALL: [InvestorType; 5] = [
        InvestorType::VeryConservative,
        InvestorType::Conservative,
        InvestorType::Balanced,
        InvestorType::Growth,
        InvestorType::Aggressive,
    ];

    /// Inclusive bands over the rounded overall score.
    pub fn from_score(overall: u32) -> Self {
        match overall {
            0..=20 => InvestorType::VeryConservative,
            21..=40 => InvestorType::Conservative,
            41..=60 => InvestorType::Balanced,
            61..=80 => InvestorType::Growth,
            _ => InvestorType::Aggressive,
        }
    }

    pub fn rank(self) -> u32 {
        match self {
            InvestorType::VeryConservative => 0,
            InvestorType::Conservative => 1,
            InvestorType::Balanced => 2,
            InvestorType::Growth => 3,
            InvestorType::Aggressive => 4,
        }
    }

    pub fn implied_percentile(self) -> f64 {
        ((self.rank() + 1) * 20) as f64
    }

    pub fn label(self) -> &'static str {
        match self {
            InvestorType::VeryConservative => "Very Conservative",
            InvestorType::Conservative => "Conservative",
            InvestorType::Balanced => "Balanced",
            InvestorType::Growth => "Growth",
            InvestorType::Aggressive => "Aggressive",
        }
    }
}

impl fmt::Display for InvestorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: RiskDimension,
    pub label: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfileResult {
    pub answers: BTreeMap<String, u8>,
    pub dimensions: Vec<DimensionScore>,
    pub overall: u32,
    pub investor_type: InvestorType,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl RiskProfileResult {
    pub fn dimension_score(&self, dimension: RiskDimension) -> Option<f64> {
        self.dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .map(|d| d.score)
    }
}

pub fn score_risk_profile(answers: &BTreeMap<String, u8>) -> Result<RiskProfileResult> {
    score_risk_profile_at(answers, Utc::now())
}

/// Scores all twelve answers. Every question must be answered on the 1..=5
/// scale; unknown keys are carried through untouched.
pub fn score_risk_profile_at(
    answers: &BTreeMap<String, u8>,
    timestamp: DateTime<Utc>,
) -> Result<RiskProfileResult> {
    let mut sums = [0.0_f64; 6];
    let mut counts = [0_u32; 6];

    for question in &QUESTIONS {
        let value = *answers
            .get(question.id)
            .ok_or(EngineError::MissingAnswer(question.id))?;
        if !(1..=5).contains(&value) {
            return Err(EngineError::AnswerOutOfRange {
                question: question.id,
                value,
            });
        }

        let raw = if question.dimension.reverse_scored() {
            6 - value
        } else {
            value
        };
        let slot = question.dimension as usize;
        sums[slot] += raw as f64;
        counts[slot] += 1;
    }

    let dimensions: Vec<DimensionScore> = RiskDimension::ALL
        .iter()
        .map(|&dimension| {
            let slot = dimension as usize;
            let mean = sums[slot] / counts[slot] as f64;
            DimensionScore {
                dimension,
                label: dimension.label().to_string(),
                score: mean / 5.0 * 100.0,
            }
        })
        .collect();

    let weighted: f64 = dimensions
        .iter()
        .map(|d| d.score * d.dimension.weight())
        .sum();
    let overall = weighted.round() as u32;

    Ok(RiskProfileResult {
        answers: answers.clone(),
        dimensions,
        overall,
        investor_type: InvestorType::from_score(overall),
        timestamp,
        version: PROFILE_VERSION.to_string(),
    })
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct AllocationBand {
    pub equity: &'static str,
    pub debt: &'static str,
    pub gold: &'static str,
    pub cash: &'static str,
}

pub fn allocation_band(investor_type: InvestorType) -> AllocationBand {
    let (equity, debt, gold, cash) = match investor_type {
        InvestorType::VeryConservative => ("10-20%", "55-70%", "5-10%", "10-20%"),
        InvestorType::Conservative => ("20-35%", "45-60%", "5-10%", "10-15%"),
        InvestorType::Balanced => ("40-60%", "30-45%", "5-10%", "5-10%"),
        InvestorType::Growth => ("65-80%", "15-30%", "5-10%", "0-5%"),
        InvestorType::Aggressive => ("80-95%", "0-15%", "5-10%", "0-5%"),
    };
    AllocationBand {
        equity,
        debt,
        gold,
        cash,
    }
}

pub const CASH_BUFFER_NOTE: &str =
    "Consider a larger cash buffer until income stabilizes or emergency fund is adequate.";

/// A missing capacity or liquidity score counts as zero.
pub fn special_notes(dimensions: &[DimensionScore]) -> Vec<String> {
    let score = |dimension| {
        dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .map_or(0.0, |d| d.score)
    };

    let mut notes = Vec::new();
    if score(RiskDimension::Capacity) < 50.0 || score(RiskDimension::Liquidity) < 50.0 {
        notes.push(CASH_BUFFER_NOTE.to_string());
    }
    notes
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Driver {
    pub dimension: String,
    pub score: f64,
}

/// Three highest-scoring dimensions; ties keep questionnaire order.
pub fn top_drivers(dimensions: &[DimensionScore]) -> Vec<Driver> {
    let mut drivers: Vec<Driver> = dimensions
        .iter()
        .map(|d| Driver {
            dimension: d.label.clone(),
            score: d.score,
        })
        .collect();
    drivers.sort_by(|a, b| b.score.total_cmp(&a.score));
    drivers.truncate(3);
    drivers
}
