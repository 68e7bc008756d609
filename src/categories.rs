use crate::schema::ReconciledRecord;
use crate::taxonomy::DEFAULT_FORM_SYNONYMS;
use crate::utils::normalize_text;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category used for records whose prescription form is blank.
pub const UNCATEGORIZED_LABEL: &str = "(no category)";

/// Normalized raw form label to canonical category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryMapping {
    entries: HashMap<String, String>,
}

impl CategoryMapping {
    /// The baked-in table of known pharmaceutical-form synonyms.
    pub fn builtin() -> Self {
        let mut mapping = Self::default();
        for (raw, category) in DEFAULT_FORM_SYNONYMS {
            mapping.insert(raw, category);
        }
        mapping
    }

    /// Maps `raw_label` (normalized on insert) to `category`.
    pub fn insert(&mut self, raw_label: &str, category: &str) {
        let key = normalize_text(raw_label);
        if key.is_empty() {
            return;
        }
        self.entries.insert(key, category.trim().to_string());
    }

    pub fn remove(&mut self, raw_label: &str) -> Option<String> {
        self.entries.remove(&normalize_text(raw_label))
    }

    /// Exact lookup on an already-normalized label.
    pub fn lookup(&self, normalized_label: &str) -> Option<&str> {
        self.entries.get(normalized_label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = (&String, &mut String)> {
        self.entries.iter_mut()
    }
}

/// One raw label with no mapping and how much of it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UnmappedCategory {
    pub label: String,
    /// Summed record quantities, not a record count.
    pub tally: u64,
}

/// Running quantity totals of unmapped raw labels, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnmappedTally {
    order: Vec<String>,
    totals: HashMap<String, u64>,
}

impl UnmappedTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: &str, quantity: u64) {
        match self.totals.get_mut(label) {
            Some(total) => *total += quantity,
            None => {
                self.order.push(label.to_string());
                self.totals.insert(label.to_string(), quantity);
            }
        }
    }

    pub fn merge(&mut self, other: &UnmappedTally) {
        for label in &other.order {
            if let Some(quantity) = other.totals.get(label) {
                self.add(label, *quantity);
            }
        }
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.totals.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Labels by descending tally; ties keep first-seen order.
    pub fn to_list(&self) -> Vec<UnmappedCategory> {
        let mut list: Vec<UnmappedCategory> = self
            .order
            .iter()
            .map(|label| UnmappedCategory {
                label: label.clone(),
                tally: self.totals.get(label).copied().unwrap_or(0),
            })
            .collect();
        list.sort_by(|a, b| b.tally.cmp(&a.tally));
        list
    }
}

/// A reconciled record with its canonical category.
#[derive(Debug, Clone)]
pub struct CategorizedRecord<'a> {
    pub record: &'a ReconciledRecord,
    pub category: String,
    pub mapped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Categorization<'a> {
    pub records: Vec<CategorizedRecord<'a>>,
    pub unmapped: UnmappedTally,
    pub mapped_count: usize,
    pub unmapped_count: usize,
}

/// Classifies every record. Records with no mapping keep their raw label as
/// their category and add their quantity to the unmapped tally.
pub fn categorize<'a>(
    records: &'a [ReconciledRecord],
    mapping: &CategoryMapping,
) -> Categorization<'a> {
    let mut result = Categorization::default();

    for record in records {
        let categorized = match mapping.lookup(&record.form_normalized) {
            Some(category) => {
                result.mapped_count += 1;
                CategorizedRecord {
                    record,
                    category: category.to_string(),
                    mapped: true,
                }
            }
            None => {
                let label = if record.form_normalized.is_empty() {
                    UNCATEGORIZED_LABEL.to_string()
                } else {
                    record.form_normalized.clone()
                };
                result.unmapped_count += 1;
                result.unmapped.add(&label, u64::from(record.quantity));
                CategorizedRecord {
                    record,
                    category: label,
                    mapped: false,
                }
            }
        };
        result.records.push(categorized);
    }

    result
}
