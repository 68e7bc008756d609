use crate::utils::normalize_text;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    #[schemars(description = "Oral solid forms. High priority, expected in the 15:00 pickup.")]
    Solids,
    #[schemars(description = "Dermatological semi-solid forms: creams, gels, ointments.")]
    DermatologicalSemiSolids,
    #[schemars(description = "Dermatological liquid forms: shampoos, solutions, tonics.")]
    DermatologicalLiquids,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaxonomyGroup {
    pub name: String,
    pub kind: GroupKind,
    /// Canonical categories, in report row order.
    pub subcategories: Vec<String>,
}

/// The report's category tree: three groups of named subcategories.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Taxonomy {
    pub groups: Vec<TaxonomyGroup>,
}

const SOLIDS: &[&str] = &[
    "CÁPSULAS",
    "SACHÊS",
    "COMPRIMIDOS",
    "PAPÉIS",
    "GOMAS",
    "FILMES ORAIS",
];

const SEMI_SOLIDS: &[&str] = &["CREMES", "GÉIS", "POMADAS", "LOÇÕES", "SÉRUNS", "PASTAS"];

const LIQUIDS: &[&str] = &[
    "SHAMPOOS",
    "SOLUÇÕES",
    "TÔNICOS",
    "SABONETES LÍQUIDOS",
    "ESPUMAS",
];

/// Raw pharmaceutical-form labels seen in prescription exports and the
/// subcategory each one reports under.
pub const DEFAULT_FORM_SYNONYMS: &[(&str, &str)] = &[
    ("CÁPSULA", "CÁPSULAS"),
    ("CÁPSULAS", "CÁPSULAS"),
    ("CAPS", "CÁPSULAS"),
    ("CÁPSULA GELATINOSA", "CÁPSULAS"),
    ("CÁPSULA VEGETAL", "CÁPSULAS"),
    ("CÁPSULA OLEOSA", "CÁPSULAS"),
    ("SACHÊ", "SACHÊS"),
    ("SACHÊS", "SACHÊS"),
    ("SACHET", "SACHÊS"),
    ("COMPRIMIDO", "COMPRIMIDOS"),
    ("COMPRIMIDOS", "COMPRIMIDOS"),
    ("COMPRIMIDO SUBLINGUAL", "COMPRIMIDOS"),
    ("PAPEL", "PAPÉIS"),
    ("PAPÉIS", "PAPÉIS"),
    ("ENVELOPE", "PAPÉIS"),
    ("GOMA", "GOMAS"),
    ("GOMAS", "GOMAS"),
    ("GOMA MASTIGÁVEL", "GOMAS"),
    ("FILME ORAL", "FILMES ORAIS"),
    ("FILMES ORAIS", "FILMES ORAIS"),
    ("CREME", "CREMES"),
    ("CREMES", "CREMES"),
    ("CREME NÃO IÔNICO", "CREMES"),
    ("GEL", "GÉIS"),
    ("GÉIS", "GÉIS"),
    ("GEL CREME", "GÉIS"),
    ("POMADA", "POMADAS"),
    ("POMADAS", "POMADAS"),
    ("UNGUENTO", "POMADAS"),
    ("LOÇÃO", "LOÇÕES"),
    ("LOÇÕES", "LOÇÕES"),
    ("EMULSÃO", "LOÇÕES"),
    ("SÉRUM", "SÉRUNS"),
    ("SÉRUNS", "SÉRUNS"),
    ("PASTA", "PASTAS"),
    ("PASTA D'ÁGUA", "PASTAS"),
    ("SHAMPOO", "SHAMPOOS"),
    ("XAMPU", "SHAMPOOS"),
    ("SOLUÇÃO", "SOLUÇÕES"),
    ("SOLUÇÕES", "SOLUÇÕES"),
    ("SOLUÇÃO CAPILAR", "SOLUÇÕES"),
    ("TÔNICO", "TÔNICOS"),
    ("LOÇÃO CAPILAR", "TÔNICOS"),
    ("SABONETE LÍQUIDO", "SABONETES LÍQUIDOS"),
    ("ESPUMA", "ESPUMAS"),
    ("MOUSSE", "ESPUMAS"),
];

impl Default for Taxonomy {
    fn default() -> Self {
        let group = |name: &str, kind: GroupKind, subs: &[&str]| TaxonomyGroup {
            name: name.to_string(),
            kind,
            subcategories: subs.iter().map(|s| s.to_string()).collect(),
        };

        Self {
            groups: vec![
                group("SÓLIDOS", GroupKind::Solids, SOLIDS),
                group(
                    "DERMATOLÓGICOS SEMISSÓLIDOS",
                    GroupKind::DermatologicalSemiSolids,
                    SEMI_SOLIDS,
                ),
                group(
                    "DERMATOLÓGICOS LÍQUIDOS",
                    GroupKind::DermatologicalLiquids,
                    LIQUIDS,
                ),
            ],
        }
    }
}

impl Taxonomy {
    pub fn group_of(&self, category: &str) -> Option<&TaxonomyGroup> {
        self.groups
            .iter()
            .find(|g| g.subcategories.iter().any(|s| s == category))
    }

    pub fn is_solid(&self, category: &str) -> bool {
        self.group_of(category)
            .map(|g| g.kind == GroupKind::Solids)
            .unwrap_or(false)
    }

    /// Finds the subcategory whose normalized form equals the normalized label,
    /// so `capsulas` resolves to `CÁPSULAS`.
    pub fn resolve_label(&self, label: &str) -> Option<&str> {
        let wanted = normalize_text(label);
        self.groups
            .iter()
            .flat_map(|g| g.subcategories.iter())
            .find(|s| normalize_text(s) == wanted)
            .map(String::as_str)
    }

    pub fn total_subcategories(&self) -> usize {
        self.groups.iter().map(|g| g.subcategories.len()).sum()
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str("Group,Kind,Subcategory\n");

        for group in &self.groups {
            for sub in &group.subcategories {
                output.push_str(&format!("{},{:?},{}\n", group.name, group.kind, sub));
            }
        }

        output
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        output.push_str("# Category Taxonomy\n\n");

        for group in &self.groups {
            let marker = if group.kind == GroupKind::Solids {
                " **[15:00 PICKUP]**"
            } else {
                ""
            };
            output.push_str(&format!("## {}{}\n\n", group.name, marker));
            for sub in &group.subcategories {
                output.push_str(&format!("- {}\n", sub));
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_taxonomy_shape() {
        let taxonomy = Taxonomy::default();
        assert_eq!(taxonomy.groups.len(), 3);
        for group in &taxonomy.groups {
            assert!((5..=9).contains(&group.subcategories.len()), "{}", group.name);
        }
        assert_eq!(taxonomy.groups[0].kind, GroupKind::Solids);
    }

    #[test]
    fn test_every_synonym_targets_a_subcategory() {
        let taxonomy = Taxonomy::default();
        assert!(DEFAULT_FORM_SYNONYMS.len() >= 40);
        for (raw, category) in DEFAULT_FORM_SYNONYMS {
            assert!(taxonomy.group_of(category).is_some(), "{} -> {}", raw, category);
        }
    }

    #[test]
    fn test_resolve_label_ignores_accents_and_case() {
        let taxonomy = Taxonomy::default();
        assert_eq!(taxonomy.resolve_label("capsulas"), Some("CÁPSULAS"));
        assert_eq!(taxonomy.resolve_label(" geis "), Some("GÉIS"));
        assert_eq!(taxonomy.resolve_label("OVULOS"), None);
        assert!(taxonomy.is_solid("SACHÊS"));
        assert!(!taxonomy.is_solid("CREMES"));
    }

    #[test]
    fn test_taxonomy_exports() {
        let taxonomy = Taxonomy::default();
        let csv = taxonomy.to_csv();
        assert!(csv.starts_with("Group,Kind,Subcategory"));
        assert_eq!(csv.lines().count(), taxonomy.total_subcategories() + 1);

        let markdown = taxonomy.to_markdown();
        assert!(markdown.contains("## SÓLIDOS **[15:00 PICKUP]**"));
        assert!(markdown.contains("- SHAMPOOS"));
    }
}
