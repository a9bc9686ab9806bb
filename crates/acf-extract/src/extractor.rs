use std::collections::HashSet;

use acf_core::{fold_diacritics, Level, Lexicon, PdfRow};
use regex::Regex;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::boilerplate::{collapse_whitespace, BoilerplateFilter};
use crate::document::{Document, ExtractError, Table};

/// Table names are kept without seat counts only above this length (PDF-only synthesis input).
const MIN_NAME_ONLY_LEN: usize = 5;
const MIN_TABLE_NAME_LEN: usize = 3;
/// Positional columns used when the header names no budget/tax column.
const FALLBACK_BUDGET_COL: usize = 2;
const FALLBACK_TAX_COL: usize = 5;
const SNIPPET_LEN: usize = 120;

const NAME_CHARS: &str = r"[\p{L}\d\s\-\(\),\./&]";
/// Same set without newlines, for rules anchored to a single line.
const LINE_NAME_CHARS: &str = r"[\p{L}\d \t\-\(\),\./&]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleScope {
    /// Page text with newlines collapsed to spaces.
    Collapsed,
    /// Original line structure, `^`/`$` per line.
    Lines,
}

/// One regex rule of the text fallback. Rules run in priority order and
/// a name found by an earlier rule is never emitted again.
#[derive(Debug, Clone)]
struct TextRule {
    name: &'static str,
    pattern: Regex,
    scope: RuleScope,
    with_counts: bool,
    min_name_len: usize,
    reject_stopwords: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct ColumnMap {
    name: Option<usize>,
    budget: Option<usize>,
    tax: Option<usize>,
}

/// Hybrid table/text extraction of admission rows.
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    boilerplate: BoilerplateFilter,
    header_keywords: Vec<String>,
    name_column_keywords: Vec<String>,
    budget_keywords: Vec<String>,
    tax_keywords: Vec<String>,
    row_blacklist: Vec<String>,
    name_stopwords: Vec<String>,
    rules: Vec<TextRule>,
}

impl DocumentExtractor {
    pub fn new(lexicon: &Lexicon, boilerplate_ratio: f64) -> Result<Self, ExtractError> {
        let labels = lexicon
            .program_labels
            .iter()
            .map(|l| regex::escape(l))
            .collect::<Vec<_>>()
            .join("|");

        let rules = vec![
            TextRule {
                name: "labelled_counts",
                pattern: Regex::new(&format!(
                    r"(?i)(?:{labels})\s*[:\-]?\s*({NAME_CHARS}+)(?s:.){{0,300}}?locuri\s*buget\s*[:\-]?\s*(\d+)(?s:.){{0,100}}?locuri\s*tax[aă]\s*[:\-]?\s*(\d+)"
                ))?,
                scope: RuleScope::Collapsed,
                with_counts: true,
                min_name_len: 1,
                reject_stopwords: false,
            },
            TextRule {
                name: "line_item",
                pattern: Regex::new(&format!(
                    r"(?im)^({LINE_NAME_CHARS}+?)[ \t]+(\d+)\s*loc.*?buget.*?(\d+)\s*loc.*?tax"
                ))?,
                scope: RuleScope::Lines,
                with_counts: true,
                min_name_len: MIN_NAME_ONLY_LEN + 1,
                reject_stopwords: false,
            },
            TextRule {
                name: "label_only",
                pattern: Regex::new(&format!(r"(?im)(?:{labels})[ \t]*[:\-][ \t]*([\p{{L}} \-]+?)(?:  |$)"))?,
                scope: RuleScope::Lines,
                with_counts: false,
                min_name_len: MIN_NAME_ONLY_LEN + 1,
                reject_stopwords: true,
            },
        ];

        Ok(Self {
            boilerplate: BoilerplateFilter::new(boilerplate_ratio, lexicon),
            header_keywords: lexicon.header_keywords.clone(),
            name_column_keywords: lexicon.name_column_keywords.clone(),
            budget_keywords: lexicon.budget_keywords.clone(),
            tax_keywords: lexicon.tax_keywords.clone(),
            row_blacklist: lexicon.row_blacklist.clone(),
            name_stopwords: lexicon.name_label_stopwords.clone(),
            rules,
        })
    }

    /// Table strategy first; the text fallback only runs when tables yield nothing.
    pub fn extract(&self, document: &Document) -> Vec<PdfRow> {
        let rows = self.extract_tables(document);
        if !rows.is_empty() {
            info!(rows = rows.len(), strategy = "table", "extracted admission rows");
            return rows;
        }
        debug!("table strategy returned no rows, trying text rules");
        let rows = self.extract_text(document);
        if rows.is_empty() {
            warn!(pages = document.page_count(), "no admission rows found by either strategy");
        } else {
            info!(rows = rows.len(), strategy = "text", "extracted admission rows");
        }
        rows
    }

    pub fn extract_tables(&self, document: &Document) -> Vec<PdfRow> {
        let mut rows = Vec::new();
        let mut level = None;
        for page in &document.pages {
            if level.is_none() {
                level = detect_page_level(&page.text);
            }
            for table in &page.tables {
                self.extract_table(table, level, page.number, &mut rows);
            }
        }
        rows
    }

    fn extract_table(&self, table: &Table, level: Option<Level>, page: u32, out: &mut Vec<PdfRow>) {
        let Some((header_idx, columns)) = self.find_header(table) else {
            return;
        };

        for row in &table.rows[header_idx + 1..] {
            if row.is_empty() {
                continue;
            }
            let name_idx = columns.name.unwrap_or(0);
            let Some(name) = row.get(name_idx).map(|c| collapse_whitespace(c)) else {
                continue;
            };
            if name.chars().count() < MIN_TABLE_NAME_LEN || self.is_blacklisted(&name) {
                continue;
            }

            let budget = seat_count(row, columns.budget, FALLBACK_BUDGET_COL, &[Some(name_idx), columns.tax]);
            let tax = seat_count(row, columns.tax, FALLBACK_TAX_COL, &[Some(name_idx), columns.budget]);

            if budget.is_none() && tax.is_none() && name.chars().count() <= MIN_NAME_ONLY_LEN {
                continue;
            }
            out.push(PdfRow {
                program_name: name,
                spots_budget: budget,
                spots_tax: tax,
                level,
                domain: None,
                page: Some(page),
                raw_snippet: truncate(&row.join(" | "), SNIPPET_LEN),
            });
        }
    }

    fn find_header(&self, table: &Table) -> Option<(usize, ColumnMap)> {
        table.rows.iter().enumerate().find_map(|(idx, row)| {
            let cells: Vec<String> = row.iter().map(|c| fold_lower(c)).collect();
            let joined = cells.join(" ");
            if !self.header_keywords.iter().any(|k| joined.contains(k.as_str())) {
                return None;
            }
            let mut map = ColumnMap::default();
            for (col, cell) in cells.iter().enumerate() {
                let has = |keywords: &[String]| keywords.iter().any(|k| cell.contains(k.as_str()));
                if has(&self.name_column_keywords) {
                    map.name = Some(col);
                }
                if has(&self.tax_keywords) {
                    map.tax = Some(col);
                } else if has(&self.budget_keywords) {
                    map.budget = Some(col);
                }
            }
            Some((idx, map))
        })
    }

    pub fn extract_text(&self, document: &Document) -> Vec<PdfRow> {
        let cleaned = self.boilerplate.strip_pages(&document.page_texts());
        let mut seen: HashSet<String> = HashSet::new();
        let mut rows = Vec::new();

        for (page, text) in document.pages.iter().zip(cleaned.iter()) {
            if text.trim().is_empty() {
                continue;
            }
            let lines: String = text.nfc().collect::<String>().replace("-\n", "");
            let collapsed = lines.replace('\n', " ");
            let level = detect_page_level(&collapsed);

            for rule in &self.rules {
                let haystack = match rule.scope {
                    RuleScope::Collapsed => collapsed.as_str(),
                    RuleScope::Lines => lines.as_str(),
                };
                for caps in rule.pattern.captures_iter(haystack) {
                    let Some(name) = caps.get(1).map(|m| collapse_whitespace(m.as_str())) else {
                        continue;
                    };
                    if name.chars().count() < rule.min_name_len || seen.contains(&name) {
                        continue;
                    }
                    if rule.reject_stopwords && self.has_stopword(&name) {
                        continue;
                    }
                    let (budget, tax) = if rule.with_counts {
                        (
                            caps.get(2).and_then(|m| m.as_str().parse().ok()),
                            caps.get(3).and_then(|m| m.as_str().parse().ok()),
                        )
                    } else {
                        (None, None)
                    };
                    let snippet = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                    debug!(rule = rule.name, page = page.number, name = %name, "text rule matched");
                    seen.insert(name.clone());
                    rows.push(PdfRow {
                        program_name: name,
                        spots_budget: budget,
                        spots_tax: tax,
                        level,
                        domain: None,
                        page: Some(page.number),
                        raw_snippet: truncate(snippet, SNIPPET_LEN),
                    });
                }
            }
        }

        rows.retain(|row| !self.is_blacklisted(&row.program_name));
        rows
    }

    fn is_blacklisted(&self, name: &str) -> bool {
        let folded = fold_lower(name);
        self.row_blacklist.iter().any(|b| folded.contains(b.as_str()))
    }

    fn has_stopword(&self, name: &str) -> bool {
        let folded = fold_lower(name);
        self.name_stopwords.iter().any(|s| folded.contains(s.as_str()))
    }
}

fn fold_lower(text: &str) -> String {
    collapse_whitespace(&fold_diacritics(text).to_lowercase())
}

/// Master wins over Licenta when a page mentions both.
fn detect_page_level(text: &str) -> Option<Level> {
    let upper = fold_diacritics(text).to_uppercase();
    if upper.contains("MASTER") {
        Some(Level::Master)
    } else if upper.contains("LICENTA") {
        Some(Level::Licenta)
    } else {
        None
    }
}

/// The mapped cell, or the positional column when this row leaves the mapped one blank.
/// A positional column already claimed by another mapping is never borrowed.
fn seat_count(row: &[String], mapped: Option<usize>, fallback: usize, taken: &[Option<usize>]) -> Option<u32> {
    if let Some(cell) = mapped.and_then(|idx| row.get(idx)).filter(|c| !c.trim().is_empty()) {
        return parse_int_lenient(cell);
    }
    if taken.contains(&Some(fallback)) {
        return None;
    }
    row.get(fallback).and_then(|c| parse_int_lenient(c))
}

/// "10 (2 rromi)" -> 10, "1.200" -> 1200, "-" -> None.
pub fn parse_int_lenient(cell: &str) -> Option<u32> {
    let head = cell.split(['(', '[', '{']).next().unwrap_or_default();
    let digits: String = head.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Page;

    fn extractor() -> DocumentExtractor {
        DocumentExtractor::new(&Lexicon::default(), 0.6).unwrap()
    }

    fn table(rows: &[&[&str]]) -> Table {
        Table {
            rows: rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect(),
        }
    }

    #[test]
    fn lenient_integer_parsing() {
        assert_eq!(parse_int_lenient("10 (2 rromi)"), Some(10));
        assert_eq!(parse_int_lenient(" 1.200 "), Some(1200));
        assert_eq!(parse_int_lenient("-"), None);
        assert_eq!(parse_int_lenient("(5)"), None);
        assert_eq!(parse_int_lenient("99999999999999"), None);
    }

    #[test]
    fn table_strategy_maps_columns_and_skips_blacklist() {
        let doc = Document {
            pages: vec![Page {
                number: 1,
                text: "Studii universitare de LICENȚĂ".into(),
                tables: vec![table(&[
                    &["Nr.", "Domeniul / Specializarea", "Locuri buget", "Locuri cu taxă"],
                    &["1", "Automatică și Informatică Aplicată", "50 (2 rromi)", "20"],
                    &["2", "Arte", "", ""],
                    &["3", "Mecatronica si Robotica", "", ""],
                    &["", "TOTAL", "90", "40"],
                ])],
            }],
        };
        let rows = extractor().extract(&doc);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].program_name, "Automatică și Informatică Aplicată");
        assert_eq!(rows[0].spots_budget, Some(50));
        assert_eq!(rows[0].spots_tax, Some(20));
        assert_eq!(rows[0].level, Some(Level::Licenta));
        assert_eq!(rows[0].page, Some(1));
        assert_eq!(rows[1].program_name, "Mecatronica si Robotica");
        assert!(!rows[1].has_spots());
    }

    #[test]
    fn positional_fallback_when_header_names_no_seat_columns() {
        let doc = Document {
            pages: vec![Page {
                number: 1,
                text: String::new(),
                tables: vec![table(&[
                    &["Program de studii", "Forma", "A", "B", "C", "D"],
                    &["Informatica", "IF", "30", "x", "x", "12"],
                ])],
            }],
        };
        let rows = extractor().extract_tables(&doc);
        assert_eq!(rows[0].spots_budget, Some(30));
        assert_eq!(rows[0].spots_tax, Some(12));
    }

    #[test]
    fn blank_mapped_cell_falls_back_per_row() {
        let doc = Document {
            pages: vec![Page {
                number: 1,
                text: String::new(),
                tables: vec![
                    table(&[
                        &["Program de studii", "Forma", "Cod", "Locuri buget", "Locuri taxa", "Obs"],
                        &["Informatica", "IF", "30", "", "", "12"],
                        &["Drept european", "IF", "99", "40", "10", "7"],
                    ]),
                    table(&[
                        &["Specializarea", "Forma", "Taxa", "Buget"],
                        &["Matematica", "IF", "15", ""],
                    ]),
                ],
            }],
        };
        let rows = extractor().extract_tables(&doc);
        assert_eq!((rows[0].spots_budget, rows[0].spots_tax), (Some(30), Some(12)));
        assert_eq!((rows[1].spots_budget, rows[1].spots_tax), (Some(40), Some(10)));
        // column 2 already holds the tax count
        assert_eq!((rows[2].spots_budget, rows[2].spots_tax), (None, Some(15)));
    }

    #[test]
    fn text_rules_keep_page_provenance_and_dedupe() {
        let doc = Document::from_page_texts([
            "Universitatea din Craiova\nMaster anul I\nSpecializarea: Ingineria Sistemelor Locuri buget: 25 Locuri taxa: 10\n",
            "Universitatea din Craiova\nMaster anul II\nInformatica Aplicata 30 locuri buget, 15 locuri taxa\nProgramul: Tehno-\nlogia Informatiei\nProgramul: Informatica Aplicata\n",
            "Universitatea din Craiova\nMaster sesiunea iulie\nProgramul: Agronomie Montana\nCopie conform cu originalul 12 locuri buget 3 locuri taxa\n",
        ]);
        let rows = extractor().extract(&doc);
        let names: Vec<&str> = rows.iter().map(|r| r.program_name.as_str()).collect();
        assert_eq!(names, ["Ingineria Sistemelor", "Informatica Aplicata", "Tehnologia Informatiei"]);

        assert_eq!(rows[0].page, Some(1));
        assert_eq!(rows[0].spots_budget, Some(25));
        assert_eq!(rows[0].spots_tax, Some(10));
        assert_eq!(rows[1].page, Some(2));
        assert_eq!(rows[1].spots_budget, Some(30));
        assert_eq!(rows[1].spots_tax, Some(15));
        assert_eq!(rows[2].spots_budget, None);
        assert!(rows.iter().all(|r| r.level == Some(Level::Master)));
    }

    #[test]
    fn scanned_document_yields_nothing() {
        let doc = Document::from_page_texts(["", "   "]);
        assert!(extractor().extract(&doc).is_empty());
    }
}
