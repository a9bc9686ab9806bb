use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use acf_core::{fold_diacritics, Candidate, Level, Lexicon, ProgramRecord, SourceType};
use acf_extract::{BoilerplateFilter, Document};
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::grades::GradeParser;
use crate::{
    element_text, find_container, parse_selector, read_yaml_file, resolve_url, AdapterContext, AdapterError,
    FacultyConfig, UniversityAdapter,
};

static RE_SPOTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(\d+)\s*loc(?:uri)?\s*(?:la\s+)?buget.*?(\d+)\s*loc(?:uri)?\s*(?:cu\s+)?tax").unwrap()
});
static RE_BUDGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*loc(?:uri)?\s*(?:la\s+)?buget").unwrap());
static RE_TAX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*loc(?:uri)?\s*(?:cu\s+)?tax").unwrap());
/// " - 100 locuri buget ..." trailing a list item's program name.
static RE_SPOTS_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+[-–:]\s*\d+\s*loc(?:uri)?\b.*$").unwrap());
static RE_CONTACT_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(tel|fax|str|bd|nr)\.?\s*:").unwrap());

const CONTENT_SELECTORS: &[&str] = &[
    "div#continut_standard",
    "div#main_content",
    "article",
    ".entry-content",
    ".post-content",
    ".page-content",
    ".content-area",
    "main",
];
const LINK_SELECTORS: &[&str] = &["div#continut_standard", "div#main_content"];

const LIST_CONFIDENCE: f64 = 0.5;
const LIST_WITH_SPOTS_BONUS: f64 = 0.3;
const TABLE_CONFIDENCE: f64 = 0.85;
const JSONLD_CONFIDENCE: f64 = 0.6;
const MIN_LIST_TITLE_LEN: usize = 10;
const MIN_TABLE_NAME_LEN: usize = 5;
const TABLE_BUDGET_COL: usize = 1;
const TABLE_TAX_COL: usize = 3;

/// Keyword tables for the Universitatea din Craiova sites plus the faculty list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UcvRules {
    pub faculties: Vec<FacultyConfig>,
    pub program_whitelist: Vec<String>,
    pub list_noise: Vec<String>,
    pub extended_noise: Vec<String>,
    pub table_footnote_markers: Vec<String>,
    pub grade_link_keywords: Vec<String>,
    pub grade_link_negative: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for UcvRules {
    fn default() -> Self {
        let list_noise = words(&["ghid", "tutorial", "documente", "taxe", "inscriere", "calendar", "confirmare"]);
        let mut extended_noise = list_noise.clone();
        extended_noise.extend(words(&[
            "modalitati", "tematica", "interviu", "contact", "regulament", "concurs", "studenti", "burse",
            "cazare", "social", "sport", "finalizare", "strategia", "proiecte", "cercetare", "declaratii",
            "structura", "conducere", "acorduri", "baza materiala", "orar", "fise", "articole", "evenimente",
            "rezultate", "acte", "dosar", "admitere online",
        ]));
        Self {
            faculties: Vec::new(),
            program_whitelist: words(&[
                "licenta", "master", "doctorat", "inginerie", "drept", "litere", "stiinte", "matematica",
                "fizica", "chimie", "informatica", "geografie", "teologie", "istorie", "filosofie", "sociologie",
                "psihologie", "educatie", "administratie", "economie", "finante", "management", "marketing",
                "agricultura", "horticultura", "silvicultura", "mediu", "biologie", "peisagistica",
                "autovehicule", "robotica", "mecatronica", "electrica", "energetica", "aerospatiala",
                "calculatoare", "automatica",
            ]),
            list_noise,
            extended_noise,
            table_footnote_markers: words(&["din care"]),
            grade_link_keywords: words(&["rezultate", "admis", "liste", "clasament", "medii"]),
            grade_link_negative: words(&["cazare", "burse", "programare"]),
        }
    }
}

impl UcvRules {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        read_yaml_file(path.as_ref())
    }
}

pub struct UcvAdapter {
    rules: UcvRules,
    boilerplate: BoilerplateFilter,
    grades: GradeParser,
}

impl UcvAdapter {
    pub fn new(lexicon: &Lexicon, rules: UcvRules) -> Self {
        Self {
            rules,
            boilerplate: BoilerplateFilter::new(0.6, lexicon),
            grades: GradeParser::new(lexicon),
        }
    }

    fn extract_jsonld(&self, document: &Html, ctx: &AdapterContext) -> Result<Vec<ProgramRecord>, AdapterError> {
        let selector = parse_selector(r#"script[type="application/ld+json"]"#)?;
        let mut out = Vec::new();
        for script in document.select(&selector) {
            let raw = script.text().collect::<String>();
            let Ok(data) = serde_json::from_str::<JsonValue>(&raw) else {
                debug!(url = %ctx.page_url, "skipping unparsable json-ld block");
                continue;
            };
            let Some(courses) = data.get("hasCourse").and_then(JsonValue::as_array) else {
                continue;
            };
            for name in courses.iter().filter_map(|c| c.get("name").and_then(JsonValue::as_str)) {
                let mut record = self.new_record(name.trim(), ctx, SourceType::JsonLd);
                record.accuracy_confidence = JSONLD_CONFIDENCE;
                out.push(record);
            }
        }
        Ok(out)
    }

    fn extract_list_items(
        &self,
        container: ElementRef<'_>,
        ctx: &AdapterContext,
        domain: &mut Option<String>,
    ) -> Result<Vec<ProgramRecord>, AdapterError> {
        let selector = parse_selector("ul > li")?;
        let mut out = Vec::new();
        for li in container.select(&selector) {
            let text = element_text(li);
            if text.is_empty() {
                continue;
            }
            if let Some(label) = domain_heading(&text) {
                *domain = Some(label);
                continue;
            }
            let lower = fold_diacritics(&text).to_lowercase();
            if let Some(reason) = self.boilerplate.structural_verdict(li) {
                debug!(url = %ctx.page_url, text = %text, reason = %reason, "structural reject");
                continue;
            }

            let has_spots = RE_BUDGET.is_match(&text) || RE_TAX.is_match(&text);
            let contains = |list: &[String]| list.iter().any(|k| lower.contains(k.as_str()));
            let is_noise = contains(&self.rules.list_noise) || contains(&self.rules.extended_noise);
            if has_spots {
                if is_noise {
                    continue;
                }
            } else if !contains(&self.rules.program_whitelist)
                || is_noise
                || text.chars().count() < MIN_LIST_TITLE_LEN
            {
                continue;
            }
            if RE_CONTACT_LINE.is_match(&text) {
                continue;
            }

            let name = clean_list_name(&text);
            let (budget, tax) = match RE_SPOTS.captures(&text) {
                Some(caps) => (capture_u32(&caps, 1), capture_u32(&caps, 2)),
                None => (
                    RE_BUDGET.captures(&text).and_then(|c| capture_u32(&c, 1)),
                    RE_TAX.captures(&text).and_then(|c| capture_u32(&c, 1)),
                ),
            };

            let mut record = self.new_record(&name, ctx, SourceType::HtmlList);
            record.language = Some(detect_language(&lower).to_string());
            record.domain = domain.clone();
            record.spots_raw = has_spots.then(|| text.clone());
            record.spots_budget = budget;
            record.spots_tax = tax;
            record.accuracy_confidence = LIST_CONFIDENCE + if budget.is_some() { LIST_WITH_SPOTS_BONUS } else { 0.0 };
            out.push(record);
        }
        Ok(out)
    }

    fn extract_tables(
        &self,
        container: ElementRef<'_>,
        ctx: &AdapterContext,
        domain: &mut Option<String>,
    ) -> Result<Vec<ProgramRecord>, AdapterError> {
        let table_sel = parse_selector("table")?;
        let row_sel = parse_selector("tr")?;
        let header_cell_sel = parse_selector("td, th")?;
        let cell_sel = parse_selector("td")?;
        let mut out = Vec::new();

        for table in container.select(&table_sel) {
            let rows: Vec<ElementRef<'_>> = table.select(&row_sel).collect();
            let Some(header) = rows.first() else {
                continue;
            };
            let mut budget_col = None;
            let mut tax_col = None;
            for (idx, cell) in header.select(&header_cell_sel).enumerate() {
                let label = fold_diacritics(&element_text(cell)).to_lowercase();
                if label.contains("buget") {
                    budget_col = Some(idx);
                }
                if label.contains("tax") {
                    tax_col = Some(idx);
                }
            }
            let budget_col = budget_col.unwrap_or(TABLE_BUDGET_COL);
            let tax_col = tax_col.unwrap_or(TABLE_TAX_COL);

            for row in &rows[1..] {
                let cells: Vec<String> = row.select(&cell_sel).map(element_text).collect();
                if cells.len() < 2 {
                    continue;
                }
                let raw_name = &cells[0];
                if let Some(label) = domain_heading(raw_name) {
                    *domain = Some(label);
                    continue;
                }
                let lower = fold_diacritics(raw_name).to_lowercase();
                if raw_name.chars().count() < MIN_TABLE_NAME_LEN
                    || self.rules.table_footnote_markers.iter().any(|m| lower.contains(m.as_str()))
                {
                    continue;
                }

                let primary = raw_name.split(':').next().map(str::trim).unwrap_or_default();
                let name = if primary.is_empty() { raw_name.as_str() } else { primary };
                let budget = cells.get(budget_col).and_then(|c| parse_table_count(c));
                let tax = cells.get(tax_col).and_then(|c| parse_table_count(c));
                let whitelisted = {
                    let folded = fold_diacritics(name).to_lowercase();
                    self.rules.program_whitelist.iter().any(|k| folded.contains(k.as_str()))
                };
                let has_counts = budget.is_some_and(|b| b > 0) || tax.is_some_and(|t| t > 0);
                if !has_counts && !whitelisted {
                    continue;
                }

                let mut record = self.new_record(name, ctx, SourceType::HtmlTable);
                record.language = Some(detect_language(&lower).to_string());
                record.domain = domain.clone();
                record.spots_budget = budget;
                record.spots_tax = tax;
                record.spots_raw = Some(format!(
                    "Table: {raw_name} | B:{} T:{}",
                    budget.map(|b| b.to_string()).unwrap_or_default(),
                    tax.map(|t| t.to_string()).unwrap_or_default()
                ));
                record.accuracy_confidence = TABLE_CONFIDENCE;
                out.push(record);
            }
        }
        Ok(out)
    }

    fn new_record(&self, name: &str, ctx: &AdapterContext, source_type: SourceType) -> ProgramRecord {
        let mut record = ProgramRecord::new(&ctx.faculty_slug, name, source_type);
        record.level = Level::detect(&ctx.page_url);
        record.source_url = ctx.page_url.clone();
        record.admission_year = Some(ctx.admission_year);
        record
    }

    fn pdf_links<'a>(&self, document: &'a Html) -> Result<Vec<(ElementRef<'a>, String)>, AdapterError> {
        let container = find_container(document, LINK_SELECTORS)?;
        let link_sel = parse_selector("a[href]")?;
        Ok(container
            .select(&link_sel)
            .filter_map(|a| {
                let href = a.value().attr("href")?.trim();
                let path = href.split(['?', '#']).next().unwrap_or_default();
                path.to_ascii_lowercase().ends_with(".pdf").then(|| (a, href.to_string()))
            })
            .collect())
    }
}

impl UniversityAdapter for UcvAdapter {
    fn slug(&self) -> &'static str {
        "ucv"
    }

    fn name(&self) -> &'static str {
        "Universitatea din Craiova"
    }

    fn discover_faculties(&self) -> Result<Vec<FacultyConfig>, AdapterError> {
        Ok(self.rules.faculties.clone())
    }

    fn extract_programs(&self, html: &str, ctx: &AdapterContext) -> Result<Vec<ProgramRecord>, AdapterError> {
        let document = Html::parse_document(html);
        let container = find_container(&document, CONTENT_SELECTORS)?;

        let mut domain = None;
        let mut records = self.extract_jsonld(&document, ctx)?;
        records.extend(self.extract_list_items(container, ctx, &mut domain)?);
        records.extend(self.extract_tables(container, ctx, &mut domain)?);

        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(r.id.clone()));
        debug!(url = %ctx.page_url, faculty = %ctx.faculty_slug, programs = records.len(), "extracted html programs");
        Ok(records)
    }

    fn extract_pdf_candidates(&self, html: &str, ctx: &AdapterContext) -> Result<Vec<Candidate>, AdapterError> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (link, href) in self.pdf_links(&document)? {
            let Some(url) = resolve_url(&ctx.page_url, &href) else {
                continue;
            };
            if seen.insert(url.clone()) {
                out.push(Candidate::new(url, element_text(link), ctx.fetched_at));
            }
        }
        Ok(out)
    }

    fn extract_grade_candidates(&self, html: &str, ctx: &AdapterContext) -> Result<Vec<Candidate>, AdapterError> {
        let document = Html::parse_document(html);
        let year = ctx.admission_year.to_string();
        let mut out = Vec::new();
        for (link, href) in self.pdf_links(&document)? {
            let text = element_text(link);
            let lower = fold_diacritics(&text).to_lowercase();
            let mut score = 0.0;
            if self.rules.grade_link_keywords.iter().any(|k| lower.contains(k.as_str())) {
                score += 10.0;
            }
            if self.rules.grade_link_negative.iter().any(|k| lower.contains(k.as_str())) {
                score -= 100.0;
            }
            if lower.contains(&year) || href.contains(&year) {
                score += 5.0;
            }
            if score <= 0.0 {
                continue;
            }
            let Some(url) = resolve_url(&ctx.page_url, &href) else {
                continue;
            };
            let mut candidate = Candidate::new(url, text, ctx.fetched_at);
            candidate.stage_a_score = score;
            out.push(candidate);
        }
        out.sort_by(|a, b| b.stage_a_score.total_cmp(&a.stage_a_score));
        Ok(out)
    }

    fn parse_grades(&self, document: &Document) -> BTreeMap<String, f64> {
        self.grades.parse(document)
    }
}

fn capture_u32(caps: &regex::Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

const DOMAIN_PREFIX: &str = "domeniul";

/// "Domeniul: Calculatoare" -> Some("Calculatoare").
fn domain_heading(text: &str) -> Option<String> {
    let prefix = text.get(..DOMAIN_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(DOMAIN_PREFIX) {
        return None;
    }
    let label = text[DOMAIN_PREFIX.len()..].trim_matches(|c: char| c.is_whitespace() || c == ':');
    Some(label.to_string())
}

/// Drops seat-count tails: "Informatica, 30 locuri" -> "Informatica"; "A; B" -> "A".
fn clean_list_name(text: &str) -> String {
    let mut name = RE_SPOTS_TAIL.replace(text, "").trim().to_string();
    if let Some((head, tail)) = name.split_once(',') {
        if tail.chars().any(|c| c.is_ascii_digit()) || tail.to_lowercase().contains("locuri") {
            name = head.trim().to_string();
        }
    }
    if let Some((head, _)) = name.split_once(';') {
        name = head.trim().to_string();
    }
    name
}

fn parse_table_count(cell: &str) -> Option<u32> {
    let cleaned = cell.replace('*', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

fn detect_language(folded_lower: &str) -> &'static str {
    if folded_lower.contains("englez") || folded_lower.contains("english") {
        "English"
    } else if folded_lower.contains("francez") {
        "French"
    } else {
        "Romanian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn adapter() -> UcvAdapter {
        UcvAdapter::new(&Lexicon::default(), UcvRules::default())
    }

    fn ctx(url: &str) -> AdapterContext {
        AdapterContext {
            faculty_slug: "ace".into(),
            page_url: url.into(),
            fetched_at: Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap(),
            admission_year: 2026,
        }
    }

    #[test]
    fn list_items_pass_the_decision_matrix() {
        let html = r#"<html><body><div id="continut_standard">
            <ul>
              <li><a href="/t">Termeni si Conditii</a></li>
              <li>Informatica Aplicata - 100 locuri buget, 50 locuri taxa.</li>
              <li>Calendar admitere licenta 2026</li>
              <li>Taxe: 20 locuri cu taxa pentru studenti</li>
              <li>Tel: 0251 435 724 inginerie</li>
              <li>Calculatoare (in limba engleza)</li>
              <li>Domeniul: Ingineria Sistemelor</li>
              <li>Automatica si Informatica Aplicata</li>
            </ul></div></body></html>"#;
        let records = adapter()
            .extract_programs(html, &ctx("https://ace.ucv.ro/admitere/licenta"))
            .unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "Informatica Aplicata",
                "Calculatoare (in limba engleza)",
                "Automatica si Informatica Aplicata"
            ]
        );

        let first = &records[0];
        assert_eq!(first.spots_budget, Some(100));
        assert_eq!(first.spots_tax, Some(50));
        assert_eq!(first.accuracy_confidence, 0.8);
        assert_eq!(first.level, Some(Level::Licenta));
        assert_eq!(first.source_type, SourceType::HtmlList);
        assert_eq!(first.admission_year, Some(2026));

        assert_eq!(records[1].language.as_deref(), Some("English"));
        assert_eq!(records[1].accuracy_confidence, 0.5);
        assert_eq!(records[2].domain.as_deref(), Some("Ingineria Sistemelor"));
    }

    #[test]
    fn tables_map_seat_columns_and_track_domains() {
        let html = r#"<html><body><main><table>
            <tr><th>DOMENII – SPECIALIZĂRI</th><th>BUGET</th><th>Obs</th><th>TAXĂ</th></tr>
            <tr><td>Domeniul Agronomie</td><td></td><td></td><td></td></tr>
            <tr><td>Agricultura: Inginer agronom</td><td>60*</td><td></td><td>40</td></tr>
            <tr><td>din care 5 locuri rromi</td><td>5</td><td></td><td></td></tr>
            <tr><td>Montanologie</td><td>-</td><td></td><td>-</td></tr>
            <tr><td>Horticultura</td><td></td><td></td><td></td></tr>
        </table></main></body></html>"#;
        let records = adapter()
            .extract_programs(html, &ctx("https://agro.ucv.ro/admitere/licenta"))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Agricultura");
        assert_eq!(records[0].spots_budget, Some(60));
        assert_eq!(records[0].spots_tax, Some(40));
        assert_eq!(records[0].domain.as_deref(), Some("Agronomie"));
        assert_eq!(records[0].source_type, SourceType::HtmlTable);
        assert_eq!(records[0].accuracy_confidence, 0.85);
        assert_eq!(records[1].name, "Horticultura");
        assert!(!records[1].has_spots());
    }

    #[test]
    fn jsonld_courses_become_records() {
        let html = r#"<html><head><script type="application/ld+json">
            {"@type":"CollegeOrUniversity","hasCourse":[{"name":"Mecatronica"},{"name":"Robotica"}]}
        </script></head><body></body></html>"#;
        let records = adapter().extract_programs(html, &ctx("https://ace.ucv.ro/master")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_type, SourceType::JsonLd);
        assert_eq!(records[0].level, Some(Level::Master));
    }

    #[test]
    fn pdf_candidates_are_absolute_and_unique() {
        let html = r#"<div id="continut_standard">
            <a href="docs/Cifra_scolarizare_2026.pdf">Cifra de scolarizare 2026</a>
            <a href="docs/Cifra_scolarizare_2026.pdf">duplicat</a>
            <a href="/orar.html">Orar</a>
            <a href="https://cdn.ucv.ro/ghid.PDF?v=2">Ghid</a>
        </div>"#;
        let candidates = adapter()
            .extract_pdf_candidates(html, &ctx("https://ace.ucv.ro/admitere/"))
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].url, "https://ace.ucv.ro/admitere/docs/Cifra_scolarizare_2026.pdf");
        assert_eq!(candidates[0].link_text, "Cifra de scolarizare 2026");
        assert_eq!(candidates[1].url, "https://cdn.ucv.ro/ghid.PDF?v=2");
    }

    #[test]
    fn grade_candidates_are_scored_and_sorted() {
        let html = r#"<body>
            <a href="a.pdf">Liste admisi</a>
            <a href="b.pdf">Rezultate finale 2026</a>
            <a href="c.pdf">Rezultate cazare</a>
            <a href="d.pdf">Ghidul candidatului</a>
        </body>"#;
        let candidates = adapter()
            .extract_grade_candidates(html, &ctx("https://ace.ucv.ro/"))
            .unwrap();
        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, ["https://ace.ucv.ro/b.pdf", "https://ace.ucv.ro/a.pdf"]);
        assert_eq!(candidates[0].stage_a_score, 15.0);
    }

    #[test]
    fn domain_headings() {
        assert_eq!(domain_heading("DOMENIUL: Silvicultură").as_deref(), Some("Silvicultură"));
        assert_eq!(domain_heading("Domenii conexe"), None);
        assert_eq!(domain_heading("Științe"), None);
    }

    #[test]
    fn list_name_cleaning() {
        assert_eq!(clean_list_name("Informatica, 30 locuri"), "Informatica");
        assert_eq!(clean_list_name("Drept, Economie"), "Drept, Economie");
        assert_eq!(clean_list_name("Istorie; la distanta"), "Istorie");
        assert_eq!(
            clean_list_name("Informatica Aplicata - 100 locuri buget, 50 locuri taxa."),
            "Informatica Aplicata"
        );
        assert_eq!(clean_list_name("Geografie: 40 loc. buget"), "Geografie");
        assert_eq!(clean_list_name("Calculatoare - engleza"), "Calculatoare - engleza");
    }
}
