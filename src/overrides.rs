use crate::categories::{CategoryMapping, UnmappedCategory};
use crate::taxonomy::Taxonomy;
use crate::utils::normalize_text;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Caller-supplied changes to the built-in category mapping.
/// Settings screens and the unmapped-item resolution flow both produce this.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct MappingOverrides {
    #[schemars(description = "Ordered list of modifications applied on top of the built-in mapping.")]
    #[serde(default)]
    pub modifications: Vec<MappingModification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MappingModification {
    /// Map a raw form label to a category, replacing any built-in entry.
    Assign {
        #[schemars(description = "The raw pharmaceutical form as it appears in the prescription log.")]
        raw_label: String,
        #[schemars(
            description = "Target category. Names matching a taxonomy subcategory (ignoring case and accents) use that subcategory."
        )]
        category: String,
    },

    /// Drop a built-in entry so the label shows up as unmapped.
    Remove { raw_label: String },

    /// Point every entry mapped to `from` at `to` instead.
    RenameCategory { from: String, to: String },
}

/// The resolution UI's answer for one unmapped label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UnmappedResolution {
    #[schemars(description = "The unmapped label exactly as reported.")]
    pub label: String,
    #[schemars(description = "Chosen category, or null to leave the label unmapped.")]
    pub category: Option<String>,
}

impl MappingOverrides {
    /// A plain `raw label -> category` overlay.
    pub fn from_overlay<I, K, V>(overlay: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            modifications: overlay
                .into_iter()
                .map(|(raw_label, category)| MappingModification::Assign {
                    raw_label: raw_label.into(),
                    category: category.into(),
                })
                .collect(),
        }
    }

    pub fn from_resolutions(resolutions: &[UnmappedResolution]) -> Self {
        Self {
            modifications: resolutions
                .iter()
                .filter_map(|r| {
                    r.category.as_ref().map(|category| MappingModification::Assign {
                        raw_label: r.label.clone(),
                        category: category.clone(),
                    })
                })
                .collect(),
        }
    }

    /// Blank resolution requests for an unmapped list, ready for the UI to fill.
    pub fn pending_resolutions(unmapped: &[UnmappedCategory]) -> Vec<UnmappedResolution> {
        unmapped
            .iter()
            .map(|u| UnmappedResolution {
                label: u.label.clone(),
                category: None,
            })
            .collect()
    }

    /// Applies the modifications in order to a copy of `base`.
    pub fn apply(&self, base: &CategoryMapping, taxonomy: &Taxonomy) -> CategoryMapping {
        let mut mapping = base.clone();

        for modification in &self.modifications {
            match modification {
                MappingModification::Assign {
                    raw_label,
                    category,
                } => {
                    let target = taxonomy.resolve_label(category).unwrap_or(category.as_str());
                    mapping.insert(raw_label, target);
                }
                MappingModification::Remove { raw_label } => {
                    mapping.remove(raw_label);
                }
                MappingModification::RenameCategory { from, to } => {
                    let from = normalize_text(from);
                    let target = taxonomy.resolve_label(to).unwrap_or(to.as_str()).trim().to_string();
                    for (_, category) in mapping.entries_mut() {
                        if normalize_text(category) == from {
                            *category = target.clone();
                        }
                    }
                }
            }
        }

        mapping
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(MappingOverrides)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}
