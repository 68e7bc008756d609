//! Date-partitioned batch orchestration.
//!
//! A batch discovers every production date present in the two logs, then
//! processes the dates in fixed-size groups. Inside a group the per-date
//! computation runs first, then all of the group's persistence calls run
//! concurrently. Accumulators are only written after the whole group has
//! joined, and a short pause separates consecutive groups.

use crate::aggregator::{AggregationResult, Aggregator};
use crate::categories::{categorize, CategoryMapping, UnmappedCategory, UnmappedTally};
use crate::columns::ResolvedSchema;
use crate::config::{EngineConfig, FailurePolicy};
use crate::dates::{DayMonth, RunContext};
use crate::engine::Reconciler;
use crate::error::{ReconciliationError, Result};
use crate::gateway::{GatewayError, PersistenceGateway, Report, ReportLineItem};
use crate::ingestion::BatchInput;
use crate::schema::{DatasetKind, RawRow};
use crate::taxonomy::Taxonomy;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    DatesDiscovered,
    Batching,
    Aggregating,
    Persisting,
    Done,
    Failed,
}

impl BatchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: BatchPhase) -> bool {
        use BatchPhase::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Idle, DatesDiscovered)
                | (DatesDiscovered, Batching)
                | (Batching, Aggregating)
                | (Aggregating, Persisting)
                | (Aggregating, Batching)
                | (Aggregating, Done)
                | (Persisting, Batching)
                | (Persisting, Done)
        )
    }
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::DatesDiscovered => "dates discovered",
            Self::Batching => "batching",
            Self::Aggregating => "aggregating",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// A date that could not be processed, with the error that stopped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateFailure {
    pub date: DayMonth,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub check_only: bool,
    /// Every discovered date, in discovery order.
    pub dates: Vec<DayMonth>,
    /// Empty for check-only runs.
    pub results: Vec<AggregationResult>,
    pub failures: Vec<DateFailure>,
    /// Dates with no rows on one of the two sides.
    pub skipped_dates: Vec<DayMonth>,
    /// Unmapped labels summed across every date that completed.
    pub unmapped: Vec<UnmappedCategory>,
    pub weekend_adjustments: usize,
    pub phase_history: Vec<BatchPhase>,
}

impl BatchReport {
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Mutable state of one batch, written only between concurrency groups.
#[derive(Debug)]
pub struct BatchRun {
    phase: BatchPhase,
    history: Vec<BatchPhase>,
    results: Vec<AggregationResult>,
    failures: Vec<DateFailure>,
    skipped: Vec<DayMonth>,
    unmapped: UnmappedTally,
}

impl Default for BatchRun {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRun {
    pub fn new() -> Self {
        Self {
            phase: BatchPhase::Idle,
            history: vec![BatchPhase::Idle],
            results: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            unmapped: UnmappedTally::new(),
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn history(&self) -> &[BatchPhase] {
        &self.history
    }

    pub fn transition(&mut self, next: BatchPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ReconciliationError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Batch phase: {} -> {}", self.phase, next);
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = BatchPhase::Failed;
            self.history.push(BatchPhase::Failed);
        }
    }
}

/// Extracted date of every row, computed once per batch.
struct DateIndex<'a> {
    prescription: &'a [RawRow],
    control: &'a [RawRow],
    prescription_dates: Vec<Option<DayMonth>>,
    control_dates: Vec<Option<DayMonth>>,
    dates: Vec<DayMonth>,
}

impl<'a> DateIndex<'a> {
    fn scan(context: &RunContext, prescription: &'a [RawRow], control: &'a [RawRow]) -> Self {
        let prescription_dates: Vec<Option<DayMonth>> =
            prescription.iter().map(|row| context.extract_date(row)).collect();
        let control_dates: Vec<Option<DayMonth>> =
            control.iter().map(|row| context.extract_date(row)).collect();

        let mut seen = HashSet::new();
        let dates = prescription_dates
            .iter()
            .chain(control_dates.iter())
            .flatten()
            .filter(|date| seen.insert(**date))
            .copied()
            .collect();

        Self {
            prescription,
            control,
            prescription_dates,
            control_dates,
            dates,
        }
    }

    fn select(rows: &'a [RawRow], dates: &[Option<DayMonth>], date: DayMonth) -> Vec<&'a RawRow> {
        rows.iter()
            .zip(dates)
            .filter(|(_, found)| **found == Some(date))
            .map(|(row, _)| row)
            .collect()
    }

    fn prescription_for(&self, date: DayMonth) -> Vec<&'a RawRow> {
        Self::select(self.prescription, &self.prescription_dates, date)
    }

    fn control_for(&self, date: DayMonth) -> Vec<&'a RawRow> {
        Self::select(self.control, &self.control_dates, date)
    }
}

enum DateOutcome {
    Skipped,
    Checked(UnmappedTally),
    Aggregated(AggregationResult, UnmappedTally),
    Failed(ReconciliationError),
}

pub struct BatchOrchestrator<'a> {
    config: &'a EngineConfig,
    gateway: Option<&'a dyn PersistenceGateway>,
    taxonomy: Taxonomy,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(config: &'a EngineConfig, gateway: &'a dyn PersistenceGateway) -> Self {
        Self {
            config,
            gateway: Some(gateway),
            taxonomy: Taxonomy::default(),
        }
    }

    /// An orchestrator that can only run check-only batches.
    pub fn without_gateway(config: &'a EngineConfig) -> Self {
        Self {
            config,
            gateway: None,
            taxonomy: Taxonomy::default(),
        }
    }

    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    pub async fn run(&self, input: &BatchInput) -> Result<BatchReport> {
        self.execute(input, input.check_only).await
    }

    /// Runs `input` in check-only mode whatever its flag says.
    pub async fn check_unmapped(&self, input: &BatchInput) -> Result<Vec<UnmappedCategory>> {
        Ok(self.execute(input, true).await?.unmapped)
    }

    async fn execute(&self, input: &BatchInput, check_only: bool) -> Result<BatchReport> {
        self.config.validate()?;
        input.validate()?;

        let gateway = match (check_only, self.gateway) {
            (true, _) => None,
            (false, Some(gateway)) => {
                if input.tenant.trim().is_empty() {
                    return Err(ReconciliationError::InvalidInput(
                        "a tenant is required to persist reports".to_string(),
                    ));
                }
                Some(gateway)
            }
            (false, None) => {
                return Err(ReconciliationError::InvalidInput(
                    "a persistence gateway is required for a full run".to_string(),
                ))
            }
        };

        info!(
            "Starting {} batch: {} prescription rows, {} control rows",
            if check_only { "check-only" } else { "full" },
            input.prescription_rows.len(),
            input.control_rows.len()
        );

        let context = RunContext::new(self.config);
        let mut run = BatchRun::new();

        let index = DateIndex::scan(&context, &input.prescription_rows, &input.control_rows);
        if index.dates.is_empty() {
            run.fail();
            warn!("No dates found in either dataset");
            return Err(ReconciliationError::NoDatesFound);
        }
        run.transition(BatchPhase::DatesDiscovered)?;
        info!(
            "Discovered {} date(s): {}",
            index.dates.len(),
            index
                .dates
                .iter()
                .map(DayMonth::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mapping = input
            .overrides
            .apply(&CategoryMapping::builtin(), &self.taxonomy);

        for (group_number, group) in index.dates.chunks(self.config.group_size).enumerate() {
            if group_number > 0 && self.config.throttle_ms > 0 {
                tokio::time::sleep(self.config.throttle()).await;
            }

            run.transition(BatchPhase::Batching)?;
            debug!("Processing group {} with {} date(s)", group_number + 1, group.len());

            run.transition(BatchPhase::Aggregating)?;
            let mut outcomes: Vec<(DayMonth, DateOutcome)> = group
                .iter()
                .map(|&date| (date, self.process_date(date, &index, &mapping, check_only)))
                .collect();

            if let Some(gateway) = gateway {
                if outcomes
                    .iter()
                    .any(|(_, outcome)| matches!(outcome, DateOutcome::Aggregated(..)))
                {
                    run.transition(BatchPhase::Persisting)?;
                    let tenant = input.tenant.as_str();
                    let persisted = join_all(outcomes.iter().map(move |(_, outcome)| async move {
                        match outcome {
                            DateOutcome::Aggregated(result, _) => {
                                persist(gateway, tenant, result).await
                            }
                            _ => Ok(()),
                        }
                    }))
                    .await;

                    for ((_, outcome), persisted) in outcomes.iter_mut().zip(persisted) {
                        if let Err(error) = persisted {
                            *outcome = DateOutcome::Failed(error);
                        }
                    }
                }
            }

            if let Err(error) = self.merge_group(&mut run, outcomes) {
                run.fail();
                return Err(error);
            }
        }

        run.transition(BatchPhase::Done)?;
        info!(
            "Batch finished: {} processed, {} failed, {} skipped, {} unmapped label(s)",
            run.results.len(),
            run.failures.len(),
            run.skipped.len(),
            run.unmapped.len()
        );

        Ok(BatchReport {
            check_only,
            dates: index.dates,
            results: run.results,
            failures: run.failures,
            skipped_dates: run.skipped,
            unmapped: run.unmapped.to_list(),
            weekend_adjustments: context.adjusted_dates(),
            phase_history: run.history,
        })
    }

    /// Folds a joined group into the run. Under `AbortBatch` the first failure
    /// of the group is returned instead.
    fn merge_group(&self, run: &mut BatchRun, outcomes: Vec<(DayMonth, DateOutcome)>) -> Result<()> {
        let mut abort: Option<ReconciliationError> = None;

        for (date, outcome) in outcomes {
            match outcome {
                DateOutcome::Skipped => {
                    info!("Skipping {}: one of the logs has no rows for it", date);
                    run.skipped.push(date);
                }
                DateOutcome::Checked(unmapped) => run.unmapped.merge(&unmapped),
                DateOutcome::Aggregated(result, unmapped) => {
                    run.unmapped.merge(&unmapped);
                    run.results.push(result);
                }
                DateOutcome::Failed(error) => {
                    warn!("Date {} failed: {}", date, error);
                    match self.config.failure_policy {
                        FailurePolicy::Isolate => run.failures.push(DateFailure {
                            date,
                            message: error.to_string(),
                        }),
                        FailurePolicy::AbortBatch => {
                            abort.get_or_insert(error);
                        }
                    }
                }
            }
        }

        match abort {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn process_date(
        &self,
        date: DayMonth,
        index: &DateIndex<'_>,
        mapping: &CategoryMapping,
        check_only: bool,
    ) -> DateOutcome {
        let prescription = index.prescription_for(date);
        let control = index.control_for(date);
        if prescription.is_empty() || control.is_empty() {
            return DateOutcome::Skipped;
        }

        match self.analyze_date(date, &prescription, &control, mapping, check_only) {
            Ok(outcome) => outcome,
            Err(error) => DateOutcome::Failed(error),
        }
    }

    fn analyze_date(
        &self,
        date: DayMonth,
        prescription: &[&RawRow],
        control: &[&RawRow],
        mapping: &CategoryMapping,
        check_only: bool,
    ) -> Result<DateOutcome> {
        let label = date.to_string();
        let prescription_schema = ResolvedSchema::resolve(DatasetKind::Prescription, prescription, &label)?;
        let control_schema = ResolvedSchema::resolve(DatasetKind::Control, control, &label)?;

        let output = Reconciler::new(&prescription_schema, &control_schema).reconcile(prescription, control);
        let categorization = categorize(&output.records, mapping);
        debug!(
            "{}: {} records, {} mapped, {} unmapped",
            date,
            output.records.len(),
            categorization.mapped_count,
            categorization.unmapped_count
        );

        if check_only {
            return Ok(DateOutcome::Checked(categorization.unmapped));
        }

        let result = Aggregator::new(&self.taxonomy, self.config.kanban_limit).aggregate(
            date,
            &categorization,
            prescription.len() + control.len(),
        )?;
        Ok(DateOutcome::Aggregated(result, categorization.unmapped))
    }
}

/// Stores one date's report: find, upsert, replace line items, mark processed.
async fn persist(
    gateway: &dyn PersistenceGateway,
    tenant: &str,
    result: &AggregationResult,
) -> Result<()> {
    let date = result.date;
    let with_date = |error: GatewayError| ReconciliationError::Persistence {
        date: date.to_string(),
        message: error.message,
    };

    let existing = gateway.find_report(&date, tenant).await.map_err(with_date)?;
    let report = Report {
        id: existing.and_then(|r| r.id),
        tenant: tenant.to_string(),
        date,
        summary: result.kpi.clone(),
        result: result.clone(),
    };

    let stored = gateway.upsert_report(report).await.map_err(with_date)?;
    let report_id = stored
        .id
        .ok_or_else(|| with_date(GatewayError::new("stored report has no id")))?;

    gateway
        .replace_report_line_items(report_id, ReportLineItem::from_result(result))
        .await
        .map_err(with_date)?;
    gateway
        .upsert_processing_marker(&date, &result.kpi)
        .await
        .map_err(with_date)?;

    debug!("Persisted report {} for {}", report_id, date);
    Ok(())
}

/// Runs a full batch against `gateway`, or a check-only batch when the input asks for one.
pub async fn run_batch(
    input: &BatchInput,
    gateway: &dyn PersistenceGateway,
    config: &EngineConfig,
) -> Result<BatchReport> {
    BatchOrchestrator::new(config, gateway).run(input).await
}

/// Collects the cross-date unmapped list without aggregating or persisting.
pub async fn check_unmapped(input: &BatchInput, config: &EngineConfig) -> Result<Vec<UnmappedCategory>> {
    BatchOrchestrator::without_gateway(config)
        .check_unmapped(input)
        .await
}
