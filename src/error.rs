use thiserror::Error;

/// Errors raised by the factorization engine.
///
/// Configuration and empty-input errors surface before any training work
/// begins. `UnknownIdentifier` is only returned by the explicit lookup APIs;
/// batch prediction absorbs it into the fallback value.
#[derive(Error, Debug)]
pub enum SvdError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("unknown {kind} identifier: {id}")]
    UnknownIdentifier { kind: IdKind, id: String },

    #[error("length mismatch: expected {expected} values, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid rating record at row {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("missing column `{0}` in ratings file")]
    MissingColumn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration source error: {0}")]
    Config(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Item,
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKind::User => write!(f, "user"),
            IdKind::Item => write!(f, "item"),
        }
    }
}

pub type Result<T> = std::result::Result<T, SvdError>;
