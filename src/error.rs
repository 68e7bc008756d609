use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Could not resolve the '{field}' column of the {dataset} rows for date {date}")]
    SchemaResolution {
        date: String,
        dataset: String,
        field: String,
    },

    #[error("No dates were found in the uploaded data")]
    NoDatesFound,

    #[error("{message} (date {date})")]
    Persistence { date: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Matrix integrity violation on {date}: matrix holds {matrix_total} records, {records} were reconciled")]
    MatrixIntegrity {
        date: String,
        matrix_total: u64,
        records: u64,
    },

    #[error("Invalid batch phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ReconciliationError {
    /// The date this error is scoped to, when it is date-scoped.
    pub fn date(&self) -> Option<&str> {
        match self {
            Self::SchemaResolution { date, .. }
            | Self::Persistence { date, .. }
            | Self::MatrixIntegrity { date, .. } => Some(date),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
