//! Heuristic column discovery.
//!
//! Uploads come from different spreadsheet layouts, so logical fields are bound to
//! real column names once per dataset and date by matching normalized header
//! names against ordered candidate lists. Essential fields that no candidate
//! matches fall back to a fixed column position in the row's field order.

use crate::error::{ReconciliationError, Result};
use crate::schema::{DatasetKind, LogicalField, RawRow};
use crate::utils::normalize_text;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// How one logical field is discovered in a dataset.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRule {
    pub field: LogicalField,
    /// Candidate header fragments, highest priority first.
    pub candidates: &'static [&'static str],
    /// Positional default, only consulted for essential fields.
    pub position: Option<usize>,
    pub essential: bool,
}

pub const PRESCRIPTION_RULES: &[ColumnRule] = &[
    ColumnRule {
        field: LogicalField::FormLabel,
        candidates: &["FORMA FARMACEUTICA", "FORMA", "FORM", "APRESENTACAO"],
        position: Some(2),
        essential: true,
    },
    ColumnRule {
        field: LogicalField::ReceiptId,
        candidates: &["NUMERO DA RECEITA", "RECEITA", "REQUISICAO", "RECEIPT", "NUMERO", "NUM"],
        position: Some(0),
        essential: true,
    },
    ColumnRule {
        field: LogicalField::SequenceId,
        candidates: &["SEQUENCIA", "SEQ", "SERIE", "ITEM"],
        position: Some(1),
        essential: true,
    },
    ColumnRule {
        field: LogicalField::SellerName,
        candidates: &["VENDEDOR", "ATENDENTE", "CONSULTOR", "SELLER"],
        position: None,
        essential: false,
    },
    ColumnRule {
        field: LogicalField::MonetaryValue,
        candidates: &["VALOR LIQUIDO", "VALOR TOTAL", "VALOR", "PRECO", "TOTAL"],
        position: None,
        essential: false,
    },
    ColumnRule {
        field: LogicalField::Quantity,
        candidates: &["QUANTIDADE", "QTDE", "QTD", "QUANT"],
        position: None,
        essential: false,
    },
];

pub const CONTROL_RULES: &[ColumnRule] = &[
    ColumnRule {
        field: LogicalField::ReceiptId,
        candidates: &["NUMERO DA RECEITA", "RECEITA", "REQUISICAO", "NUMERO", "NUM", "NR"],
        position: Some(0),
        essential: true,
    },
    ColumnRule {
        field: LogicalField::SequenceId,
        candidates: &["SEQUENCIA", "SEQ", "SERIE"],
        position: Some(1),
        essential: true,
    },
    ColumnRule {
        field: LogicalField::TimeOfDay,
        candidates: &["HORARIO", "HORA", "TIME"],
        position: Some(2),
        essential: true,
    },
    ColumnRule {
        field: LogicalField::LineId,
        candidates: &["LINHA", "BANCADA", "SETOR"],
        position: None,
        essential: false,
    },
];

pub fn rules_for(dataset: DatasetKind) -> &'static [ColumnRule] {
    match dataset {
        DatasetKind::Prescription => PRESCRIPTION_RULES,
        DatasetKind::Control => CONTROL_RULES,
    }
}

/// Returns the first field of `row` whose normalized name contains a normalized
/// candidate, trying candidates in priority order.
pub fn detect_column<'a>(row: &'a RawRow, candidates: &[&str]) -> Option<&'a str> {
    let names: Vec<(String, &str)> = row
        .field_names()
        .map(|name| (normalize_text(name), name))
        .collect();

    candidates.iter().find_map(|candidate| {
        let candidate = normalize_text(candidate);
        if candidate.is_empty() {
            return None;
        }
        names
            .iter()
            .find(|(normalized, _)| normalized.contains(&candidate))
            .map(|(_, original)| *original)
    })
}

/// Logical field to column name bindings for one dataset of one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSchema {
    pub dataset: DatasetKind,
    columns: BTreeMap<LogicalField, String>,
}

impl ResolvedSchema {
    /// Resolves every logical field of `dataset` against the first row of `rows`.
    ///
    /// Fails with a schema error naming `date` when an essential field stays
    /// unresolved after the positional fallback.
    pub fn resolve<R: Borrow<RawRow>>(dataset: DatasetKind, rows: &[R], date: &str) -> Result<Self> {
        let empty = RawRow::new();
        let sample: &RawRow = match rows.first() {
            Some(row) => row.borrow(),
            None => &empty,
        };
        let mut columns = BTreeMap::new();

        for rule in rules_for(dataset) {
            let detected = detect_column(sample, rule.candidates).or_else(|| {
                rule.position
                    .filter(|_| rule.essential)
                    .and_then(|p| sample.field_name_at(p))
            });

            match detected {
                Some(column) => {
                    columns.insert(rule.field, column.to_string());
                }
                None if rule.essential => {
                    return Err(ReconciliationError::SchemaResolution {
                        date: date.to_string(),
                        dataset: dataset.to_string(),
                        field: rule.field.to_string(),
                    });
                }
                None => {}
            }
        }

        log::debug!("Resolved {} columns for {}: {:?}", dataset, date, columns);

        Ok(Self { dataset, columns })
    }

    pub fn column(&self, field: LogicalField) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn is_resolved(&self, field: LogicalField) -> bool {
        self.columns.contains_key(&field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_by_normalized_containment() {
        let row = RawRow::new()
            .with("Nº Requisição", "1")
            .with("Forma Farmacêutica", "CREME")
            .with("Vendedor(a)", "ANA");
        assert_eq!(
            detect_column(&row, &["VENDEDOR"]),
            Some("Vendedor(a)")
        );
        assert_eq!(
            detect_column(&row, &["forma farmaceutica"]),
            Some("Forma Farmacêutica")
        );
        assert_eq!(detect_column(&row, &["HORA"]), None);
    }

    #[test]
    fn test_candidate_priority_beats_field_order() {
        let row = RawRow::new().with("Total Bruto", 10).with("Valor Liquido", 8);
        assert_eq!(
            detect_column(&row, &["VALOR LIQUIDO", "TOTAL"]),
            Some("Valor Liquido")
        );
    }

    #[test]
    fn test_essential_fields_fall_back_to_position() {
        let rows = vec![RawRow::new().with("a", "R1").with("b", "1").with("c", "08:00")];
        let schema = ResolvedSchema::resolve(DatasetKind::Control, &rows, "07/03").unwrap();
        assert_eq!(schema.column(LogicalField::ReceiptId), Some("a"));
        assert_eq!(schema.column(LogicalField::SequenceId), Some("b"));
        assert_eq!(schema.column(LogicalField::TimeOfDay), Some("c"));
        assert!(!schema.is_resolved(LogicalField::LineId));
    }

    #[test]
    fn test_unresolvable_essential_field_names_the_date() {
        let rows = vec![RawRow::new().with("a", "R1")];
        let err = ResolvedSchema::resolve(DatasetKind::Prescription, &rows, "07/03").unwrap_err();
        match &err {
            ReconciliationError::SchemaResolution { date, .. } => assert_eq!(date, "07/03"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("07/03"));
    }

    #[test]
    fn test_prescription_schema_from_short_headers() {
        let rows = vec![RawRow::new()
            .with("receipt", "A")
            .with("seq", "1")
            .with("form", "CREME")];
        let schema = ResolvedSchema::resolve(DatasetKind::Prescription, &rows, "07/03").unwrap();
        assert_eq!(schema.column(LogicalField::FormLabel), Some("form"));
        assert_eq!(schema.column(LogicalField::ReceiptId), Some("receipt"));
        assert_eq!(schema.column(LogicalField::SequenceId), Some("seq"));
        assert_eq!(schema.column(LogicalField::SellerName), None);
    }
}
