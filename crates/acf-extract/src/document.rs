use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::boilerplate::collapse_whitespace;

const FORM_FEED: char = '\u{000C}';
const MIN_TABLE_CELLS: usize = 3;
const MIN_TABLE_LINES: usize = 2;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document is empty")]
    Empty,
    #[error("pdf text extraction failed: {0}")]
    Pdf(String),
    #[error("document is neither pdf, json nor utf-8 text")]
    Encoding,
    #[error("invalid pre-extracted document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based.
    pub number: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tables: Vec<Table>,
}

/// Paged text plus whatever tables the backend (or column alignment) exposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub pages: Vec<Page>,
}

impl Document {
    /// Builds pages from raw text, detecting column-aligned tables on each.
    pub fn from_page_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let text = text.into();
                let tables = detect_text_tables(&text);
                Page { number: idx as u32 + 1, text, tables }
            })
            .collect();
        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_texts(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.text.as_str()).collect()
    }

    pub fn has_tables(&self) -> bool {
        self.pages.iter().any(|p| !p.tables.is_empty())
    }
}

/// Sniffs the bytes: `%PDF` goes through pdf-extract, a JSON object is a pre-extracted
/// [`Document`], anything else is UTF-8 text with form feeds between pages.
pub fn load_document(bytes: &[u8]) -> Result<Document, ExtractError> {
    let trimmed = bytes.trim_ascii_start();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }
    if trimmed.starts_with(b"%PDF") {
        return load_pdf(bytes);
    }
    if trimmed.starts_with(b"{") {
        let mut document: Document = serde_json::from_slice(trimmed)?;
        for (idx, page) in document.pages.iter_mut().enumerate() {
            if page.number == 0 {
                page.number = idx as u32 + 1;
            }
            if page.tables.is_empty() {
                page.tables = detect_text_tables(&page.text);
            }
        }
        return Ok(document);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding)?;
    Ok(Document::from_page_texts(split_pages(text)))
}

fn load_pdf(bytes: &[u8]) -> Result<Document, ExtractError> {
    // pdf-extract panics on some malformed inputs
    let pages = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem_by_pages(bytes)))
        .map_err(|_| ExtractError::Pdf("pdf backend panicked".to_string()))?
        .map_err(|err| ExtractError::Pdf(err.to_string()))?;
    debug!(pages = pages.len(), "extracted pdf text");
    Ok(Document::from_page_texts(pages))
}

fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split(FORM_FEED).map(str::to_string).collect();
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;
    for ch in line.trim().chars() {
        match ch {
            '\t' => {
                cells.push(std::mem::take(&mut current));
                spaces = 0;
            }
            ' ' => spaces += 1,
            _ => {
                if spaces >= 2 {
                    cells.push(std::mem::take(&mut current));
                } else if spaces == 1 {
                    current.push(' ');
                }
                spaces = 0;
                current.push(ch);
            }
        }
    }
    cells.push(current);
    cells
        .into_iter()
        .map(|c| collapse_whitespace(&c))
        .collect()
}

/// Runs of at least two consecutive lines that split into three or more cells on tabs
/// or 2+ spaces.
pub fn detect_text_tables(text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();
    for line in text.lines() {
        let cells = split_cells(line);
        if cells.iter().filter(|c| !c.is_empty()).count() >= MIN_TABLE_CELLS {
            run.push(cells);
            continue;
        }
        if run.len() >= MIN_TABLE_LINES {
            tables.push(Table { rows: std::mem::take(&mut run) });
        }
        run.clear();
    }
    if run.len() >= MIN_TABLE_LINES {
        tables.push(Table { rows: run });
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_with_form_feeds_becomes_pages() {
        let doc = load_document("Pagina 1\n\u{000C}Pagina 2\n\u{000C}".as_bytes()).unwrap();
        assert_eq!(doc.page_count(), 2);
        assert_eq!(doc.pages[1].number, 2);
        assert!(doc.pages[1].text.contains("Pagina 2"));
    }

    #[test]
    fn aligned_columns_are_detected_as_tables() {
        let text = "Cifra de scolarizare\nNr  Specializarea  Buget  Taxa\n1   Automatica     50     20\n2\tCalculatoare\t40\t30\nSemnatura";
        let tables = detect_text_tables(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 3);
        assert_eq!(tables[0].rows[1], vec!["1", "Automatica", "50", "20"]);
    }

    #[test]
    fn single_aligned_line_is_not_a_table() {
        assert!(detect_text_tables("A  B  C\nplain text").is_empty());
    }

    #[test]
    fn json_documents_load_with_page_numbers() {
        let json = r#"{"pages":[{"text":"x"},{"text":"y","tables":[{"rows":[["a","b"]]}]}]}"#;
        let doc = load_document(json.as_bytes()).unwrap();
        assert_eq!(doc.pages[0].number, 1);
        assert_eq!(doc.pages[1].number, 2);
        assert!(doc.has_tables());
    }

    #[test]
    fn empty_and_binary_inputs_are_errors() {
        assert!(matches!(load_document(b"   "), Err(ExtractError::Empty)));
        assert!(matches!(load_document(&[0xff, 0xfe, 0x00]), Err(ExtractError::Encoding)));
        assert!(matches!(load_document(b"%PDF-1.4 garbage"), Err(ExtractError::Pdf(_))));
    }
}
