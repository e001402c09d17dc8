use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("num_simulations must be >= 1, got {0}")]
    InvalidSimulationCount(u32),

    #[error("duration must be at most {max} years, got {years}")]
    DurationTooLong { years: u32, max: u32 },

    #[error("a target amount is required to solve for a contribution")]
    MissingTarget,

    #[error("invalid search range [{min}, {max}] with tolerance {tolerance}")]
    InvalidSearch { min: f64, max: f64, tolerance: f64 },

    #[error("missing answer for question {0}")]
    MissingAnswer(&'static str),

    #[error("answer for question {question} must be between 1 and 5, got {value}")]
    AnswerOutOfRange { question: &'static str, value: u8 },

    #[error("simulation cancelled after {completed} of {requested} trials")]
    Cancelled { completed: u32, requested: u32 },

    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend failed: {0}")]
    Store(String),
}
