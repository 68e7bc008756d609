//! Input contract for a batch.
//!
//! Rows arrive already decoded from the spreadsheets, usually as JSON objects.
//! Field order is significant (positional column fallback, first-match date
//! discovery), so objects are read with `serde_json`'s order-preserving map.

use crate::error::{ReconciliationError, Result};
use crate::overrides::MappingOverrides;
use crate::schema::{DatasetKind, RawRow, RawValue};
use serde::Deserialize;
use serde_json::Value;

/// Everything one batch run works on.
#[derive(Debug, Clone, Default)]
pub struct BatchInput {
    pub prescription_rows: Vec<RawRow>,
    pub control_rows: Vec<RawRow>,
    pub overrides: MappingOverrides,
    /// Only collect unmapped categories: no aggregation, no persistence.
    pub check_only: bool,
    /// Scopes persisted reports. Unused in check-only runs.
    pub tenant: String,
}

/// Wire form of a batch request.
#[derive(Debug, Deserialize)]
struct BatchRequest {
    prescription: Vec<Value>,
    control: Vec<Value>,
    #[serde(default)]
    overrides: MappingOverrides,
    #[serde(default)]
    check_only: bool,
    #[serde(default)]
    tenant: String,
}

impl BatchInput {
    pub fn new(prescription_rows: Vec<RawRow>, control_rows: Vec<RawRow>) -> Self {
        Self {
            prescription_rows,
            control_rows,
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn with_overrides(mut self, overrides: MappingOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn check_only(mut self) -> Self {
        self.check_only = true;
        self
    }

    /// Parses `{"prescription": [...], "control": [...], "overrides": ..., "check_only": ..., "tenant": ...}`.
    pub fn from_json(input: &str) -> Result<Self> {
        let request: BatchRequest = serde_json::from_str(input)?;
        Ok(Self {
            prescription_rows: rows_from_values(&request.prescription, DatasetKind::Prescription)?,
            control_rows: rows_from_values(&request.control, DatasetKind::Control)?,
            overrides: request.overrides,
            check_only: request.check_only,
            tenant: request.tenant,
        })
    }

    /// Rejects input no date work can start from. The tenant is checked by the
    /// orchestrator, since check-only runs do not need one.
    pub fn validate(&self) -> Result<()> {
        if self.prescription_rows.is_empty() {
            return Err(ReconciliationError::InvalidInput(format!(
                "the {} has no rows",
                DatasetKind::Prescription
            )));
        }
        if self.control_rows.is_empty() {
            return Err(ReconciliationError::InvalidInput(format!(
                "the {} has no rows",
                DatasetKind::Control
            )));
        }
        Ok(())
    }
}

/// Converts one JSON cell. Nested arrays and objects are not cell values.
pub fn raw_value_from_json(value: &Value) -> Option<RawValue> {
    match value {
        Value::Null => Some(RawValue::Empty),
        Value::Bool(b) => Some(RawValue::Text(b.to_string())),
        Value::Number(n) => n.as_f64().map(RawValue::Number),
        Value::String(s) => Some(RawValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Converts one JSON object into a row, keeping its field order.
pub fn row_from_json(value: &Value) -> Result<RawRow> {
    let object = value
        .as_object()
        .ok_or_else(|| ReconciliationError::InvalidInput("each row must be a JSON object".to_string()))?;

    object
        .iter()
        .map(|(name, cell)| {
            raw_value_from_json(cell)
                .map(|v| (name.clone(), v))
                .ok_or_else(|| {
                    ReconciliationError::InvalidInput(format!(
                        "field '{}' holds a nested value",
                        name
                    ))
                })
        })
        .collect()
}

fn rows_from_values(values: &[Value], dataset: DatasetKind) -> Result<Vec<RawRow>> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            row_from_json(value).map_err(|e| match e {
                ReconciliationError::InvalidInput(message) => ReconciliationError::InvalidInput(
                    format!("{} row {}: {}", dataset, i + 1, message),
                ),
                other => other,
            })
        })
        .collect()
}

/// Parses a JSON array of row objects.
pub fn rows_from_json(input: &str, dataset: DatasetKind) -> Result<Vec<RawRow>> {
    let values: Vec<Value> = serde_json::from_str(input)?;
    rows_from_values(&values, dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::MappingModification;

    #[test]
    fn test_field_order_is_preserved() {
        let rows = rows_from_json(
            r#"[{"zeta": "R1", "alpha": 1, "mid": null, "flag": true}]"#,
            DatasetKind::Control,
        )
        .unwrap();
        let names: Vec<&str> = rows[0].field_names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid", "flag"]);
        assert_eq!(rows[0].get("alpha"), Some(&RawValue::Number(1.0)));
        assert_eq!(rows[0].get("mid"), Some(&RawValue::Empty));
        assert_eq!(rows[0].get("flag"), Some(&RawValue::Text("true".to_string())));
    }

    #[test]
    fn test_nested_values_are_rejected_with_position() {
        let err = rows_from_json(r#"[{"a": 1}, {"b": [1, 2]}]"#, DatasetKind::Prescription).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("prescription log row 2"), "{}", message);
        assert!(message.contains("'b'"));
    }

    #[test]
    fn test_batch_request_parsing() {
        let input = BatchInput::from_json(
            r#"{
                "prescription": [{"receipt": "A", "seq": "1", "form": "CREME"}],
                "control": [{"num": "A", "seq": "1", "hora": "7:30"}],
                "overrides": {"modifications": [{"action": "remove", "raw_label": "gel"}]},
                "tenant": "lab-1"
            }"#,
        )
        .unwrap();

        assert_eq!(input.prescription_rows.len(), 1);
        assert_eq!(input.control_rows.len(), 1);
        assert!(!input.check_only);
        assert_eq!(
            input.overrides.modifications,
            vec![MappingModification::Remove {
                raw_label: "gel".to_string()
            }]
        );
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let row = RawRow::new().with("a", 1);
        assert!(BatchInput::new(vec![], vec![row.clone()]).check_only().validate().is_err());
        assert!(BatchInput::new(vec![row.clone()], vec![]).check_only().validate().is_err());
        assert!(BatchInput::new(vec![row.clone()], vec![row]).validate().is_ok());
    }
}
