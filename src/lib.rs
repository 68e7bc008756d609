//! # Production Reconciliation
//!
//! A library for turning a pharmacy's daily production exports into
//! per-time-window category reports.
//!
//! ## Core Concepts
//!
//! - **Prescription log**: what was prescribed, one row per receipt line (form, seller, value, quantity)
//! - **Control log**: when each receipt line was actually produced
//! - **Join key**: normalized `receipt|sequence`, identifying one line in both logs
//! - **Buckets**: six fixed production windows (`7:00 AS 8:00` .. `OUTROS`)
//! - **Categories**: raw pharmaceutical forms mapped onto a three-group taxonomy
//! - **Batches**: multi-day uploads are split by the date found in each row and
//!   processed date by date, a few dates at a time
//!
//! ## Example
//!
//! ```rust,ignore
//! use production_reconciliation::*;
//!
//! let prescription = vec![RawRow::new()
//!     .with("data", "07/03/2025")
//!     .with("receita", "A")
//!     .with("seq", "1")
//!     .with("forma", "CREME")];
//! let control = vec![RawRow::new()
//!     .with("data", "07/03/2025")
//!     .with("num", "A")
//!     .with("seq", "1")
//!     .with("hora", "7:30")];
//!
//! let gateway = MemoryGateway::new();
//! let input = BatchInput::new(prescription, control).with_tenant("lab-1");
//! let report = ProductionReconciler::default().process(&input, &gateway).await?;
//! assert_eq!(report.results[0].kpi.total_records, 1);
//! ```

pub mod aggregator;
pub mod batch;
pub mod buckets;
pub mod categories;
pub mod columns;
pub mod config;
pub mod dates;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ingestion;
pub mod overrides;
pub mod schema;
pub mod taxonomy;
pub mod utils;

pub use aggregator::{
    verify_matrix_integrity, AggregationResult, Aggregator, CategoryMatrix, KanbanColumn,
    KanbanEntry, KpiSummary, SellerStanding, TableRow, TableRowKind,
};
pub use batch::{
    check_unmapped, run_batch, BatchOrchestrator, BatchPhase, BatchReport, BatchRun, DateFailure,
};
pub use buckets::{bucket, BucketCounts, TimeBucket};
pub use categories::{categorize, CategoryMapping, UnmappedCategory, UnmappedTally};
pub use columns::{detect_column, ResolvedSchema};
pub use config::{EngineConfig, FailurePolicy};
pub use dates::{match_date, DayMonth, RunContext};
pub use engine::{Reconciler, ReconciliationOutput};
pub use error::{ReconciliationError, Result};
pub use gateway::{
    GatewayError, MemoryGateway, PersistenceGateway, Report, ReportId, ReportLineItem,
};
pub use ingestion::*;
pub use overrides::*;
pub use schema::*;
pub use taxonomy::{GroupKind, Taxonomy, TaxonomyGroup};
pub use utils::*;

use log::info;

/// Entry point bundling a configuration with the report taxonomy.
#[derive(Debug, Clone, Default)]
pub struct ProductionReconciler {
    pub config: EngineConfig,
    pub taxonomy: Taxonomy,
}

impl ProductionReconciler {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            taxonomy: Taxonomy::default(),
        })
    }

    pub fn from_json_config(input: &str) -> Result<Self> {
        Self::new(EngineConfig::from_json(input)?)
    }

    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    /// Runs the batch described by `input`, persisting through `gateway`
    /// unless the input is check-only.
    pub async fn process(
        &self,
        input: &BatchInput,
        gateway: &dyn PersistenceGateway,
    ) -> Result<BatchReport> {
        info!(
            "Processing upload for tenant '{}' ({} taxonomy subcategories)",
            input.tenant,
            self.taxonomy.total_subcategories()
        );
        BatchOrchestrator::new(&self.config, gateway)
            .with_taxonomy(self.taxonomy.clone())
            .run(input)
            .await
    }

    /// Lists the raw forms of an upload that have no category yet.
    pub async fn check_unmapped(&self, input: &BatchInput) -> Result<Vec<UnmappedCategory>> {
        BatchOrchestrator::without_gateway(&self.config)
            .with_taxonomy(self.taxonomy.clone())
            .check_unmapped(input)
            .await
    }
}

/// Processes a full upload with the default configuration.
pub async fn process_upload(
    input: &BatchInput,
    gateway: &dyn PersistenceGateway,
) -> Result<BatchReport> {
    ProductionReconciler::default().process(input, gateway).await
}
