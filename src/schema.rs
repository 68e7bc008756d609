use crate::buckets::TimeBucket;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use schemars::JsonSchema;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Seller shown when the prescription log has no seller for a line.
pub const DEFAULT_SELLER: &str = "—";

static EMPTY_VALUE: RawValue = RawValue::Empty;

/// An untyped scalar cell as produced by the upstream spreadsheet decoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Empty,
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl RawValue {
    /// Text rendering used by the key normalizer and the text parsers.
    pub fn to_text(&self) -> String {
        match self {
            RawValue::Empty => String::new(),
            RawValue::Number(n) => n.to_string(),
            RawValue::Text(s) => s.clone(),
            RawValue::DateTime(dt) => {
                if dt.time().num_seconds_from_midnight() == 0 {
                    dt.format("%d/%m/%Y").to_string()
                } else {
                    dt.format("%d/%m/%Y %H:%M:%S").to_string()
                }
            }
        }
    }

    /// True for absent cells and blank text.
    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(value as f64)
    }
}

impl From<i32> for RawValue {
    fn from(value: i32) -> Self {
        RawValue::Number(f64::from(value))
    }
}

impl From<NaiveDateTime> for RawValue {
    fn from(value: NaiveDateTime) -> Self {
        RawValue::DateTime(value)
    }
}

impl From<NaiveDate> for RawValue {
    fn from(value: NaiveDate) -> Self {
        RawValue::DateTime(value.and_time(chrono::NaiveTime::MIN))
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawValue::Empty)
    }
}

/// One decoded spreadsheet row.
///
/// Field order is the order the decoder produced the columns in. The positional
/// column fallback reads it, so decoders must preserve the sheet's column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    fields: Vec<(String, RawValue)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a field, keeping the original position when the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Value of a resolved column, or an empty cell when the column is unresolved
    /// or missing from this row.
    pub fn value_of(&self, column: Option<&str>) -> &RawValue {
        column.and_then(|c| self.get(c)).unwrap_or(&EMPTY_VALUE)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn field_name_at(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// The "diario": prescribed forms per receipt and sequence.
    Prescription,
    /// The "controle": production timing per receipt and sequence.
    Control,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prescription => write!(f, "prescription log"),
            Self::Control => write!(f, "control log"),
        }
    }
}

/// Logical fields the column detector binds to real column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicalField {
    FormLabel,
    ReceiptId,
    SequenceId,
    TimeOfDay,
    SellerName,
    MonetaryValue,
    Quantity,
    LineId,
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FormLabel => "formLabel",
            Self::ReceiptId => "receiptId",
            Self::SequenceId => "sequenceId",
            Self::TimeOfDay => "timeOfDay",
            Self::SellerName => "sellerName",
            Self::MonetaryValue => "monetaryValue",
            Self::Quantity => "quantity",
            Self::LineId => "lineId",
        };
        write!(f, "{}", name)
    }
}

/// One prescription line after both sources were merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub join_key: String,
    pub form_normalized: String,
    pub time_bucket: TimeBucket,
    pub seller: String,
    pub monetary_value: f64,
    pub quantity: u32,
    pub line: Option<String>,
}
