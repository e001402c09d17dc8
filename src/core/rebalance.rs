use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebalanceFrequency {
    Quarterly,
    SemiAnnually,
    #[default]
    Annually,
}

impl RebalanceFrequency {
    pub fn months(self) -> u32 {
        match self {
            RebalanceFrequency::Quarterly => 3,
            RebalanceFrequency::SemiAnnually => 6,
            RebalanceFrequency::Annually => 12,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RebalanceFrequency::Quarterly => "Rebalance every 3 months",
            RebalanceFrequency::SemiAnnually => "Rebalance every 6 months",
            RebalanceFrequency::Annually => "Rebalance once per year",
        }
    }
}

/// Date one rebalancing interval after `last`. Days past the end of the
/// target month clamp to its last day, so Aug 31 quarterly becomes Nov 30.
pub fn next_rebalance_date(frequency: RebalanceFrequency, last: NaiveDate) -> NaiveDate {
    last.checked_add_months(Months::new(frequency.months()))
        .unwrap_or(NaiveDate::MAX)
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalancePreferences {
    pub frequency: RebalanceFrequency,
    pub auto_reminders: bool,
    pub last_rebalance: NaiveDate,
    pub next_rebalance: NaiveDate,
}

impl RebalancePreferences {
    /// Without a recorded rebalance the schedule starts from `today`.
    pub fn new(
        frequency: RebalanceFrequency,
        auto_reminders: bool,
        last_rebalance: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Self {
        let last_rebalance = last_rebalance.unwrap_or(today);
        Self {
            frequency,
            auto_reminders,
            last_rebalance,
            next_rebalance: next_rebalance_date(frequency, last_rebalance),
        }
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        today >= self.next_rebalance
    }
}
