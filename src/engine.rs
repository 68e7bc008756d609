use crate::buckets::bucket;
use crate::columns::ResolvedSchema;
use crate::schema::{LogicalField, RawRow, ReconciledRecord, DEFAULT_SELLER};
use crate::utils::{join_key, normalize_key, parse_money, parse_quantity};
use log::debug;
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};

/// What the prescription log says about one line.
#[derive(Debug, Clone)]
struct PrescriptionEntry {
    form_normalized: String,
    seller: String,
    monetary_value: f64,
    quantity: u32,
}

impl Default for PrescriptionEntry {
    fn default() -> Self {
        Self {
            form_normalized: String::new(),
            seller: DEFAULT_SELLER.to_string(),
            monetary_value: 0.0,
            quantity: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationOutput {
    /// One record per distinct control-log key, in control-log order.
    pub records: Vec<ReconciledRecord>,
    pub prescription_keys: usize,
    pub duplicate_control_rows: usize,
    /// Control lines with no prescription entry. They are still reported.
    pub unattributed: usize,
}

/// Merges one date's prescription and control rows on `receipt|sequence`.
pub struct Reconciler<'a> {
    prescription_schema: &'a ResolvedSchema,
    control_schema: &'a ResolvedSchema,
}

impl<'a> Reconciler<'a> {
    pub fn new(prescription_schema: &'a ResolvedSchema, control_schema: &'a ResolvedSchema) -> Self {
        Self {
            prescription_schema,
            control_schema,
        }
    }

    fn index_prescriptions<P: Borrow<RawRow>>(
        &self,
        rows: &[P],
    ) -> HashMap<String, PrescriptionEntry> {
        let schema = self.prescription_schema;
        let column = |field| schema.column(field);
        let mut index = HashMap::with_capacity(rows.len());

        for row in rows {
            let row = row.borrow();
            let key = join_key(
                row.value_of(column(LogicalField::ReceiptId)),
                row.value_of(column(LogicalField::SequenceId)),
            );

            let seller = row.value_of(column(LogicalField::SellerName)).to_text();
            let seller = match seller.trim() {
                "" => DEFAULT_SELLER.to_string(),
                trimmed => trimmed.to_string(),
            };

            // Repeated keys overwrite: the last prescription row wins.
            index.insert(
                key,
                PrescriptionEntry {
                    form_normalized: normalize_key(row.value_of(column(LogicalField::FormLabel))),
                    seller,
                    monetary_value: parse_money(row.value_of(column(LogicalField::MonetaryValue)))
                        .max(0.0),
                    quantity: parse_quantity(row.value_of(column(LogicalField::Quantity))),
                },
            );
        }

        index
    }

    pub fn reconcile<P, C>(&self, prescription_rows: &[P], control_rows: &[C]) -> ReconciliationOutput
    where
        P: Borrow<RawRow>,
        C: Borrow<RawRow>,
    {
        let index = self.index_prescriptions(prescription_rows);
        let schema = self.control_schema;
        let column = |field| schema.column(field);

        let mut seen: HashSet<String> = HashSet::with_capacity(control_rows.len());
        let mut output = ReconciliationOutput {
            prescription_keys: index.len(),
            ..Default::default()
        };
        let fallback = PrescriptionEntry::default();

        for row in control_rows {
            let row = row.borrow();
            let key = join_key(
                row.value_of(column(LogicalField::ReceiptId)),
                row.value_of(column(LogicalField::SequenceId)),
            );

            // First occurrence of a control key wins.
            if !seen.insert(key.clone()) {
                output.duplicate_control_rows += 1;
                continue;
            }

            let entry = match index.get(&key) {
                Some(entry) => entry,
                None => {
                    output.unattributed += 1;
                    &fallback
                }
            };

            let line = row.value_of(column(LogicalField::LineId)).to_text();
            let line = Some(line.trim().to_string()).filter(|l| !l.is_empty());

            output.records.push(ReconciledRecord {
                join_key: key,
                form_normalized: entry.form_normalized.clone(),
                time_bucket: bucket(row.value_of(column(LogicalField::TimeOfDay))),
                seller: entry.seller.clone(),
                monetary_value: entry.monetary_value,
                quantity: entry.quantity,
                line,
            });
        }

        debug!(
            "Reconciled {} records ({} prescription keys, {} duplicate control rows, {} unattributed)",
            output.records.len(),
            output.prescription_keys,
            output.duplicate_control_rows,
            output.unattributed
        );

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::TimeBucket;
    use crate::schema::DatasetKind;

    fn schemas(prescription: &[RawRow], control: &[RawRow]) -> (ResolvedSchema, ResolvedSchema) {
        (
            ResolvedSchema::resolve(DatasetKind::Prescription, prescription, "07/03").unwrap(),
            ResolvedSchema::resolve(DatasetKind::Control, control, "07/03").unwrap(),
        )
    }

    #[test]
    fn test_single_line_merge() {
        let prescription = vec![RawRow::new()
            .with("receipt", "A")
            .with("seq", "1")
            .with("form", "CREME")];
        let control = vec![RawRow::new()
            .with("num", "A")
            .with("seq", "1")
            .with("hora", "7:30")];
        let (ps, cs) = schemas(&prescription, &control);

        let output = Reconciler::new(&ps, &cs).reconcile(&prescription, &control);
        assert_eq!(output.records.len(), 1);
        let record = &output.records[0];
        assert_eq!(record.form_normalized, "CREME");
        assert_eq!(record.time_bucket.label(), "7:00 AS 8:00");
        assert_eq!(record.seller, DEFAULT_SELLER);
        assert_eq!(record.quantity, 1);
        assert_eq!(record.join_key, "A|1");
    }

    #[test]
    fn test_duplicate_control_keys_keep_first() {
        let prescription = vec![RawRow::new()
            .with("receipt", "A")
            .with("seq", "1")
            .with("form", "GEL")];
        let control = vec![
            RawRow::new().with("num", "A").with("seq", "1").with("hora", "14:10"),
            RawRow::new().with("num", " a ").with("seq", 1).with("hora", "16:00"),
        ];
        let (ps, cs) = schemas(&prescription, &control);

        let output = Reconciler::new(&ps, &cs).reconcile(&prescription, &control);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].time_bucket, TimeBucket::Fourteen);
        assert_eq!(output.duplicate_control_rows, 1);
    }

    #[test]
    fn test_duplicate_prescription_keys_keep_last() {
        let prescription = vec![
            RawRow::new()
                .with("receita", "9")
                .with("seq", "1")
                .with("forma", "CREME")
                .with("vendedor", "ANA"),
            RawRow::new()
                .with("receita", "9")
                .with("seq", "1")
                .with("forma", "POMADA")
                .with("vendedor", "  BIA "),
        ];
        let control = vec![RawRow::new().with("num", "9").with("seq", "1").with("hora", "10:00")];
        let (ps, cs) = schemas(&prescription, &control);

        let output = Reconciler::new(&ps, &cs).reconcile(&prescription, &control);
        assert_eq!(output.prescription_keys, 1);
        assert_eq!(output.records[0].form_normalized, "POMADA");
        assert_eq!(output.records[0].seller, "BIA");
    }

    #[test]
    fn test_unmatched_control_row_is_still_reported() {
        let prescription = vec![RawRow::new()
            .with("receipt", "A")
            .with("seq", "1")
            .with("form", "CREME")
            .with("valor", "1.234,50")
            .with("qtd", "2")];
        let control = vec![
            RawRow::new().with("num", "B").with("seq", "7").with("hora", "15:20").with("linha", "L2"),
            RawRow::new().with("num", "A").with("seq", "1").with("hora", 0.625),
        ];
        let (ps, cs) = schemas(&prescription, &control);

        let output = Reconciler::new(&ps, &cs).reconcile(&prescription, &control);
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.unattributed, 1);

        let orphan = &output.records[0];
        assert_eq!(orphan.form_normalized, "");
        assert_eq!(orphan.seller, DEFAULT_SELLER);
        assert_eq!(orphan.monetary_value, 0.0);
        assert_eq!(orphan.line.as_deref(), Some("L2"));

        let matched = &output.records[1];
        assert_eq!(matched.monetary_value, 1234.5);
        assert_eq!(matched.quantity, 2);
        assert_eq!(matched.time_bucket, TimeBucket::Fifteen);
        assert_eq!(matched.line, None);
    }
}
