//! Document loading, boilerplate removal, name validation and admission-row extraction.

mod boilerplate;
mod document;
mod extractor;
mod validator;

pub use boilerplate::BoilerplateFilter;
pub use document::{detect_text_tables, load_document, Document, ExtractError, Page, Table};
pub use extractor::{parse_int_lenient, DocumentExtractor};
pub use validator::{
    is_title_case, normalize_for_keywords, CheckOutcome, NameValidator, RowValidation, EVIDENCE_MIN_CONTENT,
    EVIDENCE_MIN_MATCH, TABLE_MIN_CONFIDENCE,
};

pub const CRATE_NAME: &str = "acf-extract";
