use std::collections::BTreeMap;

use acf_core::{fold_diacritics, Lexicon};
use acf_extract::{Document, Table};
use tracing::debug;

/// Fewer grades than this for a program are not trusted.
pub const MIN_GRADE_SAMPLES: usize = 3;
const MIN_PASSING_GRADE: f64 = 5.0;
const MAX_GRADE: f64 = 10.0;
const MIN_GRADE: f64 = 1.0;
const MIN_PROGRAM_LEN: usize = 5;
/// Grade key used when a sheet has no program column.
pub const UNKNOWN_PROGRAM: &str = "Unknown";

/// Reads results sheets and reports the lowest admitted grade per program.
/// Only aggregates are kept, never candidate rows.
#[derive(Debug, Clone)]
pub struct GradeParser {
    grade_keywords: Vec<String>,
    program_keywords: Vec<String>,
}

impl GradeParser {
    pub fn new(lexicon: &Lexicon) -> Self {
        Self {
            grade_keywords: lexicon.grade_column_keywords.clone(),
            program_keywords: lexicon.name_column_keywords.clone(),
        }
    }

    pub fn parse(&self, document: &Document) -> BTreeMap<String, f64> {
        let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for table in document.pages.iter().flat_map(|p| p.tables.iter()) {
            self.collect_table(table, &mut samples);
        }

        samples
            .into_iter()
            .filter_map(|(program, grades)| {
                if grades.len() < MIN_GRADE_SAMPLES {
                    debug!(program = %program, samples = grades.len(), "too few grades");
                    return None;
                }
                let minimum = grades
                    .into_iter()
                    .filter(|g| (MIN_PASSING_GRADE..=MAX_GRADE).contains(g))
                    .reduce(f64::min)?;
                Some((program, minimum))
            })
            .collect()
    }

    fn collect_table(&self, table: &Table, samples: &mut BTreeMap<String, Vec<f64>>) {
        let Some(header) = table.rows.first() else {
            return;
        };
        let mut grade_col = None;
        let mut program_col = None;
        for (idx, cell) in header.iter().enumerate() {
            let folded = fold_diacritics(cell).to_lowercase();
            if self.grade_keywords.iter().any(|k| folded.contains(k.as_str())) {
                grade_col = Some(idx);
            }
            if self.program_keywords.iter().any(|k| folded.contains(k.as_str())) {
                program_col = Some(idx);
            }
        }
        let Some(grade_col) = grade_col else {
            return;
        };

        // sheets without a program column are one program's list
        let mut current_program = program_col.is_none().then(|| UNKNOWN_PROGRAM.to_string());
        for row in &table.rows[1..] {
            if let Some(cell) = program_col.and_then(|col| row.get(col)) {
                let name = cell.split_whitespace().collect::<Vec<_>>().join(" ");
                if name.chars().count() > MIN_PROGRAM_LEN {
                    current_program = Some(name);
                }
            }
            let (Some(program), Some(grade)) = (&current_program, row.get(grade_col).and_then(|c| parse_grade(c)))
            else {
                continue;
            };
            samples.entry(program.clone()).or_default().push(grade);
        }
    }
}

/// "9,50" and "9.50" both read as 9.5; anything outside 1..=10 is not a grade.
pub fn parse_grade(cell: &str) -> Option<f64> {
    let value: f64 = cell.trim().replace(',', ".").parse().ok()?;
    (MIN_GRADE..=MAX_GRADE).contains(&value).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use acf_extract::Page;

    fn results_sheet(rows: &[&[&str]]) -> Document {
        Document {
            pages: vec![Page {
                number: 1,
                text: String::new(),
                tables: vec![Table {
                    rows: rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect(),
                }],
            }],
        }
    }

    #[test]
    fn grade_cells_accept_comma_decimals() {
        assert_eq!(parse_grade("9,50"), Some(9.5));
        assert_eq!(parse_grade(" 7.25 "), Some(7.25));
        assert_eq!(parse_grade("11"), None);
        assert_eq!(parse_grade("admis"), None);
    }

    #[test]
    fn minimum_passing_grade_per_program() {
        let doc = results_sheet(&[
            &["Nr", "Specializarea", "Media de concurs"],
            &["1", "Calculatoare", "9,80"],
            &["2", "", "8,10"],
            &["3", "", "4,00"],
            &["4", "", "7,45"],
            &["5", "Automatica", "9,00"],
            &["6", "", "8,00"],
        ]);
        let grades = GradeParser::new(&Lexicon::default()).parse(&doc);
        assert_eq!(grades.len(), 1);
        assert_eq!(grades["Calculatoare"], 7.45);
    }

    #[test]
    fn sheet_without_program_column_reports_unknown() {
        let doc = results_sheet(&[
            &["Nr", "Nume", "Medie admitere"],
            &["1", "Popescu I.", "9,10"],
            &["2", "Ionescu M.", "6,75"],
            &["3", "Stan A.", "8,00"],
        ]);
        let grades = GradeParser::new(&Lexicon::default()).parse(&doc);
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[UNKNOWN_PROGRAM], 6.75);
    }

    #[test]
    fn tables_without_grade_column_are_ignored() {
        let doc = results_sheet(&[&["Specializarea", "Buget"], &["Calculatoare", "9"]]);
        assert!(GradeParser::new(&Lexicon::default()).parse(&doc).is_empty());
    }
}
