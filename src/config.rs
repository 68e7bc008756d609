use crate::dates::DEFAULT_REFERENCE_YEAR;
use crate::error::{ReconciliationError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a date-scoped failure does to the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[schemars(description = "Record the failed date and keep processing the other dates.")]
    #[default]
    Isolate,

    #[schemars(
        description = "Fail the whole batch on the first failed date, once its concurrency group has finished."
    )]
    AbortBatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    #[schemars(description = "How many dates are processed concurrently. Must be at least 1.")]
    pub group_size: usize,

    #[schemars(description = "Pause between concurrency groups, in milliseconds.")]
    pub throttle_ms: u64,

    #[schemars(description = "Year used to decide whether a DD/MM date is a Sunday.")]
    pub reference_year: i32,

    #[schemars(
        description = "When true, dates that carry their own year use it for the Sunday check instead of reference_year."
    )]
    pub use_source_year: bool,

    pub failure_policy: FailurePolicy,

    #[schemars(description = "Categories shown per time bucket in the kanban view.")]
    pub kanban_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            group_size: 3,
            throttle_ms: 250,
            reference_year: DEFAULT_REFERENCE_YEAR,
            use_source_year: false,
            failure_policy: FailurePolicy::Isolate,
            kanban_limit: 12,
        }
    }
}

impl EngineConfig {
    pub fn from_json(input: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "group_size must be at least 1".to_string(),
            ));
        }
        if self.kanban_limit == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "kanban_limit must be at least 1".to_string(),
            ));
        }
        if !(1900..=9999).contains(&self.reference_year) {
            return Err(ReconciliationError::InvalidConfig(format!(
                "reference_year {} is out of range",
                self.reference_year
            )));
        }
        Ok(())
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}
