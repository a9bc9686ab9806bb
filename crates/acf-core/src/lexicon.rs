use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::DocType;

/// Whole-token abbreviation expanded before fuzzy matching ("calc" -> "calculatoare").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abbreviation {
    pub short: String,
    pub expansion: String,
}

/// Keyword tables consumed by the heuristics. Loaded once and handed to each component,
/// so a different institution or locale only needs a different rules file.
///
/// All entries are matched against lowercase, diacritic-folded text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicon {
    pub negative_name_keywords: Vec<String>,
    pub positive_name_keywords: Vec<String>,
    pub program_suffixes: Vec<String>,
    pub name_noise_markers: Vec<String>,
    pub header_keywords: Vec<String>,
    pub name_column_keywords: Vec<String>,
    pub budget_keywords: Vec<String>,
    pub tax_keywords: Vec<String>,
    pub row_blacklist: Vec<String>,
    pub sanity_garbage_markers: Vec<String>,
    pub program_labels: Vec<String>,
    pub name_label_stopwords: Vec<String>,
    pub doc_type_keywords: BTreeMap<DocType, Vec<String>>,
    pub abbreviations: Vec<Abbreviation>,
    pub nav_keywords: Vec<String>,
    pub nav_class_denylist: Vec<String>,
    pub nav_container_tags: Vec<String>,
    pub grade_column_keywords: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Lexicon {
    fn default() -> Self {
        let mut doc_type_keywords = BTreeMap::new();
        doc_type_keywords.insert(DocType::Spots, words(&["cifra", "locuri", "capacitate"]));
        doc_type_keywords.insert(
            DocType::Results,
            words(&["rezultate", "medii", "admis", "respins", "ierarhie"]),
        );
        doc_type_keywords.insert(DocType::Guide, words(&["ghid", "metodologie", "regulament"]));
        doc_type_keywords.insert(DocType::Exam, words(&["tematica", "subiecte", "grile", "disciplina"]));
        doc_type_keywords.insert(
            DocType::Calendar,
            words(&["calendar", "programare", "data", "perioada"]),
        );

        let abbreviations = [
            ("calc", "calculatoare"),
            ("eng", "engleza"),
            ("ing", "inginerie"),
            ("auto", "automatica"),
            ("inf", "informatica"),
            ("mas", "master"),
            ("lic", "licenta"),
        ]
        .into_iter()
        .map(|(short, expansion)| Abbreviation {
            short: short.to_string(),
            expansion: expansion.to_string(),
        })
        .collect();

        Self {
            negative_name_keywords: words(&[
                "secretariat", "contact", "acasa", "home", "meniu", "menu", "search", "regulament",
                "concurs", "bibliotec", "campus", "cazare", "burse", "orar", "proiect", "partener",
                "despre", "istoric", "conducer", "departament", "login", "harta", "gdpr", "cookies",
                "anunt", "eveniment", "noutat", "presa", "media", "galerie", "admitere", "inscrier",
                "secretari",
            ]),
            positive_name_keywords: words(&[
                "inginer", "stiint", "limb", "literatur", "studi", "master", "licent", "manag",
                "drept", "informat", "tehnolog", "matemat", "chimi", "fizic", "biolog", "geografi",
                "istori", "teolog", "arte", "muzic", "teatr", "pedagog", "sport", "educati",
                "administra", "econom", "finant", "didac", "psiholog", "comunic", "sociolog",
                "arhitect", "construct", "electr", "mecanic", "agronom", "horticult", "silvicult",
                "marketing", "contab", "statistic", "kinetoterap", "farmac", "automat", "calculat",
            ]),
            program_suffixes: words(&[
                "ologie", "istica", "logie", "grafie", "metrie", "nomic", "genie", "turism", "silvic",
                "sanitar", "juridic",
            ]),
            name_noise_markers: words(&[
                "(aici)", "(detalii)", "(vezi)", "(link)", "click", "descarca", "download", "citeste",
                "[", "]", "»", "«",
            ]),
            header_keywords: words(&[
                "domeni", "specializ", "program", "studii", "buget", "tax", "cifra", "locuri",
            ]),
            name_column_keywords: words(&["domeni", "specializ", "program", "studii"]),
            budget_keywords: words(&["buget"]),
            tax_keywords: words(&["tax"]),
            row_blacklist: words(&[
                "total", "copie", "copy", "mentiunea", "original", "secretar", "semnatura",
                "signature", "document", "fiecare",
            ]),
            sanity_garbage_markers: words(&["copie", "copy"]),
            program_labels: words(&["specializarea", "programul", "domeniul", "disciplina"]),
            name_label_stopwords: words(&["master", "agronomie"]),
            doc_type_keywords,
            abbreviations,
            nav_keywords: words(&[
                "home", "acasa", "contact", "search", "cautare", "faq", "career", "cariera",
                "sitemap",
            ]),
            nav_class_denylist: words(&["menu", "nav", "footer", "sidebar", "breadcrumb"]),
            nav_container_tags: words(&["nav", "footer", "header"]),
            grade_column_keywords: words(&["medie", "nota", "concurs"]),
        }
    }
}

impl Lexicon {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing lexicon yaml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading lexicon {}", path.display()))
    }

    pub fn doc_keywords(&self, doc_type: DocType) -> &[String] {
        self.doc_type_keywords
            .get(&doc_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
