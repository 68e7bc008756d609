//! The storage contract reports are persisted through.
//!
//! Storage lives outside this crate; the orchestrator only needs four calls.
//! `MemoryGateway` implements them in-process for tests and embedding.

use crate::aggregator::{AggregationResult, KpiSummary};
use crate::buckets::TimeBucket;
use crate::dates::DayMonth;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

pub type ReportId = u64;

/// A failure reported by the storage backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct GatewayError {
    pub message: String,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// The stored report of one tenant and date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Set once the report has been stored.
    pub id: Option<ReportId>,
    pub tenant: String,
    pub date: DayMonth,
    pub summary: KpiSummary,
    pub result: AggregationResult,
}

/// One non-empty (category, bucket) cell of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLineItem {
    pub category: String,
    pub bucket: TimeBucket,
    pub count: u64,
}

impl ReportLineItem {
    /// One item per non-zero matrix cell, categories in first-seen order.
    pub fn from_result(result: &AggregationResult) -> Vec<Self> {
        result
            .matrix
            .rows()
            .iter()
            .flat_map(|row| {
                TimeBucket::ALL.iter().filter_map(move |&bucket| {
                    let count = row.counts[bucket.index()];
                    (count > 0).then(|| ReportLineItem {
                        category: row.category.clone(),
                        bucket,
                        count,
                    })
                })
            })
            .collect()
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn find_report(&self, date: &DayMonth, tenant: &str) -> GatewayResult<Option<Report>>;

    /// Inserts the report, or replaces the stored one when `report.id` is set.
    /// Returns the stored report with its id.
    async fn upsert_report(&self, report: Report) -> GatewayResult<Report>;

    /// Replaces every line item of a report. Implementations must make this
    /// atomic: readers see either the old items or the new ones, never a mix.
    async fn replace_report_line_items(
        &self,
        report_id: ReportId,
        items: Vec<ReportLineItem>,
    ) -> GatewayResult<()>;

    async fn upsert_processing_marker(&self, date: &DayMonth, summary: &KpiSummary) -> GatewayResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    reports: HashMap<ReportId, Report>,
    line_items: HashMap<ReportId, Vec<ReportLineItem>>,
    markers: HashMap<DayMonth, KpiSummary>,
    next_id: ReportId,
}

/// In-process gateway. Every call takes one lock, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    calls: AtomicUsize,
    failing_dates: HashSet<DayMonth>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `upsert_report` fail for reports of `date`.
    pub fn failing_on(mut self, date: DayMonth) -> Self {
        self.failing_dates.insert(date);
        self
    }

    /// Total number of gateway calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn report_count(&self) -> usize {
        self.state.lock().await.reports.len()
    }

    pub async fn line_items(&self, report_id: ReportId) -> Vec<ReportLineItem> {
        self.state
            .lock()
            .await
            .line_items
            .get(&report_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn marker(&self, date: &DayMonth) -> Option<KpiSummary> {
        self.state.lock().await.markers.get(date).cloned()
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn find_report(&self, date: &DayMonth, tenant: &str) -> GatewayResult<Option<Report>> {
        self.record_call();
        let state = self.state.lock().await;
        Ok(state
            .reports
            .values()
            .find(|r| r.date == *date && r.tenant == tenant)
            .cloned())
    }

    async fn upsert_report(&self, mut report: Report) -> GatewayResult<Report> {
        self.record_call();
        if self.failing_dates.contains(&report.date) {
            return Err(GatewayError::new(format!(
                "storage rejected the report for tenant '{}'",
                report.tenant
            )));
        }

        let mut state = self.state.lock().await;
        let id = match report.id {
            Some(id) if state.reports.contains_key(&id) => id,
            Some(id) => return Err(GatewayError::new(format!("report {} does not exist", id))),
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        report.id = Some(id);
        state.reports.insert(id, report.clone());
        Ok(report)
    }

    async fn replace_report_line_items(
        &self,
        report_id: ReportId,
        items: Vec<ReportLineItem>,
    ) -> GatewayResult<()> {
        self.record_call();
        let mut state = self.state.lock().await;
        if !state.reports.contains_key(&report_id) {
            return Err(GatewayError::new(format!("report {} does not exist", report_id)));
        }
        state.line_items.insert(report_id, items);
        Ok(())
    }

    async fn upsert_processing_marker(&self, date: &DayMonth, summary: &KpiSummary) -> GatewayResult<()> {
        self.record_call();
        self.state.lock().await.markers.insert(*date, summary.clone());
        Ok(())
    }
}
