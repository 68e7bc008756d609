//! Per-date report building.
//!
//! Every reconciled record lands in exactly one (category, bucket) cell of a
//! count-based matrix. The rendered table, the kanban view and the KPI summary
//! are all derived from that matrix plus a single pass over the records for
//! the seller leaderboard and the monetary totals.

use crate::buckets::{BucketCounts, TimeBucket};
use crate::categories::{Categorization, UnmappedCategory};
use crate::dates::DayMonth;
use crate::error::{ReconciliationError, Result};
use crate::taxonomy::{GroupKind, Taxonomy};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label of the derived solids row that ignores the 15:00 pickup column.
pub const EXCLUDING_PEAK_LABEL: &str = "TOTAL EXCLUDING 15:00 PICKUP";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub category: String,
    pub counts: BucketCounts,
}

impl MatrixRow {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Sparse category × bucket record counts, rows in first-seen category order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<MatrixRow>", into = "Vec<MatrixRow>")]
pub struct CategoryMatrix {
    rows: Vec<MatrixRow>,
    index: HashMap<String, usize>,
}

impl From<Vec<MatrixRow>> for CategoryMatrix {
    fn from(rows: Vec<MatrixRow>) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.category.clone(), i))
            .collect();
        Self { rows, index }
    }
}

impl From<CategoryMatrix> for Vec<MatrixRow> {
    fn from(matrix: CategoryMatrix) -> Self {
        matrix.rows
    }
}

impl CategoryMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, category: &str, bucket: TimeBucket) {
        let position = match self.index.get(category) {
            Some(&position) => position,
            None => {
                self.rows.push(MatrixRow {
                    category: category.to_string(),
                    counts: [0; TimeBucket::COUNT],
                });
                self.index.insert(category.to_string(), self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        self.rows[position].counts[bucket.index()] += 1;
    }

    /// Counts for `category`, all zero when it never occurred.
    pub fn counts(&self, category: &str) -> BucketCounts {
        self.index
            .get(category)
            .map(|&i| self.rows[i].counts)
            .unwrap_or([0; TimeBucket::COUNT])
    }

    pub fn get(&self, category: &str, bucket: TimeBucket) -> u64 {
        self.counts(category)[bucket.index()]
    }

    pub fn rows(&self) -> &[MatrixRow] {
        &self.rows
    }

    pub fn bucket_totals(&self) -> BucketCounts {
        let mut totals = [0; TimeBucket::COUNT];
        for row in &self.rows {
            for (total, count) in totals.iter_mut().zip(row.counts.iter()) {
                *total += count;
            }
        }
        totals
    }

    /// Sum of every cell.
    pub fn total(&self) -> u64 {
        self.rows.iter().map(MatrixRow::total).sum()
    }
}

/// Fails when the matrix does not account for every reconciled record.
pub fn verify_matrix_integrity(date: &DayMonth, matrix: &CategoryMatrix, records: usize) -> Result<()> {
    let matrix_total = matrix.total();
    let records = records as u64;
    if matrix_total != records {
        return Err(ReconciliationError::MatrixIntegrity {
            date: date.to_string(),
            matrix_total,
            records,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerStanding {
    pub seller: String,
    pub records: u64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableRowKind {
    SectionHeader,
    Subcategory,
    Subtotal,
    ExcludingPeak,
}

/// One line of the rendered per-date report table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub kind: TableRowKind,
    pub label: String,
    /// Empty on section headers.
    pub counts: Option<BucketCounts>,
    pub total: Option<u64>,
}

impl TableRow {
    fn header(label: &str) -> Self {
        Self {
            kind: TableRowKind::SectionHeader,
            label: label.to_string(),
            counts: None,
            total: None,
        }
    }

    fn with_counts(kind: TableRowKind, label: &str, counts: BucketCounts) -> Self {
        Self {
            kind,
            label: label.to_string(),
            counts: Some(counts),
            total: Some(counts.iter().sum()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KanbanEntry {
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KanbanColumn {
    pub bucket: TimeBucket,
    pub entries: Vec<KanbanEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketTotal {
    pub bucket: TimeBucket,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub total_records: u64,
    pub total_value: f64,
    pub solids_count: u64,
    pub top_seller: Option<String>,
    /// Source rows of both logs that belonged to this date.
    pub records_processed: u64,
    /// Summed quantities. Not comparable with the count-based totals.
    pub quantity_total: u64,
    /// Solids produced outside the 15:00 pickup window.
    pub solids_outside_peak: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub date: DayMonth,
    pub kpi: KpiSummary,
    pub table: Vec<TableRow>,
    pub leaderboard: Vec<SellerStanding>,
    pub bucket_totals: Vec<BucketTotal>,
    pub kanban: Vec<KanbanColumn>,
    pub matrix: CategoryMatrix,
    pub unmapped: Vec<UnmappedCategory>,
}

impl AggregationResult {
    pub fn table_to_csv(&self) -> String {
        let mut output = String::from("Category");
        for bucket in TimeBucket::ALL {
            output.push(',');
            output.push_str(bucket.label());
        }
        output.push_str(",TOTAL\n");

        for row in &self.table {
            output.push_str(&csv_field(&row.label));
            match (&row.counts, row.total) {
                (Some(counts), Some(total)) => {
                    for count in counts {
                        output.push_str(&format!(",{}", count));
                    }
                    output.push_str(&format!(",{}\n", total));
                }
                _ => {
                    output.push_str(&",".repeat(TimeBucket::COUNT + 1));
                    output.push('\n');
                }
            }
        }

        output
    }

    pub fn table_to_markdown(&self) -> String {
        let mut output = format!("# Production {}\n\n| Category |", self.date);
        for bucket in TimeBucket::ALL {
            output.push_str(&format!(" {} |", bucket.label()));
        }
        output.push_str(" TOTAL |\n|---|");
        output.push_str(&"---:|".repeat(TimeBucket::COUNT + 1));
        output.push('\n');

        for row in &self.table {
            match (row.kind, &row.counts, row.total) {
                (TableRowKind::SectionHeader, _, _) => {
                    output.push_str(&format!("| **{}** |", row.label));
                    output.push_str(&" |".repeat(TimeBucket::COUNT + 1));
                }
                (kind, Some(counts), Some(total)) => {
                    let label = match kind {
                        TableRowKind::Subcategory => row.label.clone(),
                        _ => format!("*{}*", row.label),
                    };
                    output.push_str(&format!("| {} |", label));
                    for count in counts {
                        output.push_str(&format!(" {} |", count));
                    }
                    output.push_str(&format!(" {} |", total));
                }
                _ => continue,
            }
            output.push('\n');
        }

        output
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub struct Aggregator<'a> {
    taxonomy: &'a Taxonomy,
    kanban_limit: usize,
}

impl<'a> Aggregator<'a> {
    pub fn new(taxonomy: &'a Taxonomy, kanban_limit: usize) -> Self {
        Self {
            taxonomy,
            kanban_limit,
        }
    }

    pub fn aggregate(
        &self,
        date: DayMonth,
        categorization: &Categorization<'_>,
        records_processed: usize,
    ) -> Result<AggregationResult> {
        let mut matrix = CategoryMatrix::new();
        let mut sellers: Vec<SellerStanding> = Vec::new();
        let mut seller_index: HashMap<&str, usize> = HashMap::new();
        let mut total_value = 0.0;
        let mut quantity_total = 0u64;
        let mut solids_count = 0u64;
        let mut solids_outside_peak = 0u64;

        for item in &categorization.records {
            let record = item.record;
            matrix.increment(&item.category, record.time_bucket);
            total_value += record.monetary_value;
            quantity_total += u64::from(record.quantity);

            if self.taxonomy.is_solid(&item.category) {
                solids_count += 1;
                if record.time_bucket != TimeBucket::PEAK {
                    solids_outside_peak += 1;
                }
            }

            let position = *seller_index.entry(record.seller.as_str()).or_insert_with(|| {
                sellers.push(SellerStanding {
                    seller: record.seller.clone(),
                    records: 0,
                    total_value: 0.0,
                });
                sellers.len() - 1
            });
            sellers[position].records += 1;
            sellers[position].total_value += record.monetary_value;
        }

        verify_matrix_integrity(&date, &matrix, categorization.records.len())?;

        // Stable: equal totals keep first-seen seller order.
        sellers.sort_by(|a, b| b.total_value.total_cmp(&a.total_value));

        let totals = matrix.bucket_totals();
        let bucket_totals = TimeBucket::ALL
            .iter()
            .map(|&bucket| BucketTotal {
                bucket,
                count: totals[bucket.index()],
            })
            .collect();

        let kpi = KpiSummary {
            total_records: matrix.total(),
            total_value,
            solids_count,
            top_seller: sellers.first().map(|s| s.seller.clone()),
            records_processed: records_processed as u64,
            quantity_total,
            solids_outside_peak,
        };

        debug!(
            "Aggregated {}: {} records in {} categories, {} solids outside the pickup window",
            date,
            kpi.total_records,
            matrix.rows().len(),
            solids_outside_peak
        );

        Ok(AggregationResult {
            date,
            table: self.render_table(&matrix),
            kanban: self.kanban(&matrix),
            leaderboard: sellers,
            bucket_totals,
            kpi,
            unmapped: categorization.unmapped.to_list(),
            matrix,
        })
    }

    fn render_table(&self, matrix: &CategoryMatrix) -> Vec<TableRow> {
        let mut rows = Vec::with_capacity(self.taxonomy.total_subcategories() + 4 * self.taxonomy.groups.len());

        for group in &self.taxonomy.groups {
            rows.push(TableRow::header(&group.name));

            let mut subtotal: BucketCounts = [0; TimeBucket::COUNT];
            for sub in &group.subcategories {
                let counts = matrix.counts(sub);
                for (total, count) in subtotal.iter_mut().zip(counts.iter()) {
                    *total += count;
                }
                rows.push(TableRow::with_counts(TableRowKind::Subcategory, sub, counts));
            }

            rows.push(TableRow::with_counts(
                TableRowKind::Subtotal,
                &format!("TOTAL {}", group.name),
                subtotal,
            ));

            if group.kind == GroupKind::Solids {
                let mut excluding = subtotal;
                excluding[TimeBucket::PEAK.index()] = 0;
                rows.push(TableRow::with_counts(
                    TableRowKind::ExcludingPeak,
                    EXCLUDING_PEAK_LABEL,
                    excluding,
                ));
            }
        }

        rows
    }

    fn kanban(&self, matrix: &CategoryMatrix) -> Vec<KanbanColumn> {
        TimeBucket::ALL
            .iter()
            .map(|&bucket| {
                let mut entries: Vec<KanbanEntry> = matrix
                    .rows()
                    .iter()
                    .filter_map(|row| {
                        let count = row.counts[bucket.index()];
                        (count > 0).then(|| KanbanEntry {
                            category: row.category.clone(),
                            count,
                        })
                    })
                    .collect();
                entries.sort_by(|a, b| b.count.cmp(&a.count));
                entries.truncate(self.kanban_limit);
                KanbanColumn { bucket, entries }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::{categorize, CategoryMapping};
    use crate::schema::ReconciledRecord;

    fn record(form: &str, bucket: TimeBucket, seller: &str, value: f64) -> ReconciledRecord {
        ReconciledRecord {
            join_key: format!("{}|{}", form, seller),
            form_normalized: form.to_string(),
            time_bucket: bucket,
            seller: seller.to_string(),
            monetary_value: value,
            quantity: 2,
            line: None,
        }
    }

    fn date() -> DayMonth {
        DayMonth::new(7, 3).unwrap()
    }

    fn sample() -> Vec<ReconciledRecord> {
        vec![
            record("CAPSULA", TimeBucket::Fifteen, "ANA", 10.0),
            record("CAPSULA", TimeBucket::Midday, "BIA", 30.0),
            record("SACHE", TimeBucket::Fifteen, "ANA", 20.0),
            record("CREME", TimeBucket::EarlyMorning, "CAIO", 50.0),
            record("OVULO", TimeBucket::Other, "BIA", 20.0),
        ]
    }

    #[test]
    fn test_matrix_sum_matches_records() {
        let records = sample();
        let categorization = categorize(&records, &CategoryMapping::builtin());
        let taxonomy = Taxonomy::default();
        let result = Aggregator::new(&taxonomy, 12)
            .aggregate(date(), &categorization, 9)
            .unwrap();

        assert_eq!(result.matrix.total(), records.len() as u64);
        assert_eq!(result.kpi.total_records, 5);
        assert_eq!(result.kpi.records_processed, 9);
        assert_eq!(result.kpi.quantity_total, 10);
        assert_eq!(result.kpi.total_value, 130.0);
        assert_eq!(result.matrix.get("CÁPSULAS", TimeBucket::Fifteen), 1);
        assert_eq!(result.matrix.get("OVULO", TimeBucket::Other), 1);

        let bucket_sum: u64 = result.bucket_totals.iter().map(|b| b.count).sum();
        assert_eq!(bucket_sum, 5);
    }

    #[test]
    fn test_solids_metrics() {
        let records = sample();
        let categorization = categorize(&records, &CategoryMapping::builtin());
        let taxonomy = Taxonomy::default();
        let result = Aggregator::new(&taxonomy, 12)
            .aggregate(date(), &categorization, 5)
            .unwrap();

        assert_eq!(result.kpi.solids_count, 3);
        assert_eq!(result.kpi.solids_outside_peak, 1);
    }

    #[test]
    fn test_leaderboard_ties_keep_first_seen_order() {
        let records = sample();
        let categorization = categorize(&records, &CategoryMapping::builtin());
        let taxonomy = Taxonomy::default();
        let result = Aggregator::new(&taxonomy, 12)
            .aggregate(date(), &categorization, 5)
            .unwrap();

        let order: Vec<&str> = result.leaderboard.iter().map(|s| s.seller.as_str()).collect();
        // BIA and CAIO tie at 50; BIA was seen first.
        assert_eq!(order, vec!["BIA", "CAIO", "ANA"]);
        assert_eq!(result.leaderboard[0].records, 2);
        assert_eq!(result.kpi.top_seller.as_deref(), Some("BIA"));
    }

    #[test]
    fn test_rendered_table_shape() {
        let records = sample();
        let categorization = categorize(&records, &CategoryMapping::builtin());
        let taxonomy = Taxonomy::default();
        let result = Aggregator::new(&taxonomy, 12)
            .aggregate(date(), &categorization, 5)
            .unwrap();

        let expected_rows = taxonomy.total_subcategories() + 2 * taxonomy.groups.len() + 1;
        assert_eq!(result.table.len(), expected_rows);
        assert_eq!(result.table[0].kind, TableRowKind::SectionHeader);

        let subtotal = result
            .table
            .iter()
            .find(|r| r.kind == TableRowKind::Subtotal)
            .unwrap();
        assert_eq!(subtotal.total, Some(3));
        assert_eq!(subtotal.counts.unwrap()[TimeBucket::Fifteen.index()], 2);

        let excluding = result
            .table
            .iter()
            .find(|r| r.kind == TableRowKind::ExcludingPeak)
            .unwrap();
        assert_eq!(excluding.label, EXCLUDING_PEAK_LABEL);
        assert_eq!(excluding.counts.unwrap()[TimeBucket::Fifteen.index()], 0);
        assert_eq!(excluding.total, Some(1));

        assert_eq!(
            result
                .table
                .iter()
                .filter(|r| r.kind == TableRowKind::ExcludingPeak)
                .count(),
            1
        );
    }

    #[test]
    fn test_kanban_limit_and_order() {
        let mut records = Vec::new();
        for (i, form) in ["A", "B", "C", "D"].iter().enumerate() {
            for _ in 0..=(i % 2) {
                records.push(record(form, TimeBucket::Fourteen, "ANA", 1.0));
            }
        }
        let categorization = categorize(&records, &CategoryMapping::default());
        let taxonomy = Taxonomy::default();
        let result = Aggregator::new(&taxonomy, 3)
            .aggregate(date(), &categorization, records.len())
            .unwrap();

        let column = result
            .kanban
            .iter()
            .find(|c| c.bucket == TimeBucket::Fourteen)
            .unwrap();
        let names: Vec<&str> = column.entries.iter().map(|e| e.category.as_str()).collect();
        assert_eq!(names, vec!["B", "D", "A"]);

        let empty = result
            .kanban
            .iter()
            .find(|c| c.bucket == TimeBucket::EarlyMorning)
            .unwrap();
        assert!(empty.entries.is_empty());
    }

    #[test]
    fn test_integrity_violation_names_date() {
        let mut matrix = CategoryMatrix::new();
        matrix.increment("CREMES", TimeBucket::Midday);
        let err = verify_matrix_integrity(&date(), &matrix, 2).unwrap_err();
        assert!(err.to_string().contains("07/03"));
        assert!(verify_matrix_integrity(&date(), &matrix, 1).is_ok());
    }

    #[test]
    fn test_exports() {
        let records = sample();
        let categorization = categorize(&records, &CategoryMapping::builtin());
        let taxonomy = Taxonomy::default();
        let result = Aggregator::new(&taxonomy, 12)
            .aggregate(date(), &categorization, 5)
            .unwrap();

        let csv = result.table_to_csv();
        assert!(csv.starts_with("Category,7:00 AS 8:00,10:00 AS 13:00,14:00,15:00,16:00 AS 17:00,OUTROS,TOTAL\n"));
        assert!(csv.contains("CÁPSULAS,0,1,0,1,0,0,2\n"));

        let markdown = result.table_to_markdown();
        assert!(markdown.contains("# Production 07/03"));
        assert!(markdown.contains("| **SÓLIDOS** |"));
    }

    #[test]
    fn test_matrix_serializes_in_first_seen_order() {
        let mut matrix = CategoryMatrix::new();
        matrix.increment("GÉIS", TimeBucket::Other);
        matrix.increment("CREMES", TimeBucket::Midday);
        let json = serde_json::to_string(&matrix).unwrap();
        let back: CategoryMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rows()[0].category, "GÉIS");
        assert_eq!(back.get("CREMES", TimeBucket::Midday), 1);
    }
}
