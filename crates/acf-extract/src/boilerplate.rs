use std::collections::{HashMap, HashSet};

use acf_core::{fold_diacritics, Lexicon};
use scraper::ElementRef;
use tracing::debug;

/// Link-text share above which a short fragment reads as a navigation item.
const NAV_LINK_RATIO: f64 = 0.8;
const NAV_LINK_MAX_LEN: usize = 50;
const NAV_KEYWORD_MAX_LEN: usize = 30;

/// Removes running headers/footers from paged text and recognizes navigational HTML fragments.
#[derive(Debug, Clone)]
pub struct BoilerplateFilter {
    ratio: f64,
    nav_keywords: Vec<String>,
    nav_class_denylist: Vec<String>,
    nav_container_tags: Vec<String>,
}

impl BoilerplateFilter {
    pub fn new(ratio: f64, lexicon: &Lexicon) -> Self {
        Self {
            ratio,
            nav_keywords: lexicon.nav_keywords.clone(),
            nav_class_denylist: lexicon.nav_class_denylist.clone(),
            nav_container_tags: lexicon.nav_container_tags.clone(),
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Stripped lines present on more than `ratio` of the pages. Each page votes once per line.
    pub fn boilerplate_lines<S: AsRef<str>>(&self, pages: &[S]) -> HashSet<String> {
        if pages.len() < 2 {
            return HashSet::new();
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for page in pages {
            let unique: HashSet<&str> = page
                .as_ref()
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            for line in unique {
                *counts.entry(line).or_default() += 1;
            }
        }
        let total = pages.len() as f64;
        counts
            .into_iter()
            .filter(|(_, count)| *count as f64 / total > self.ratio)
            .map(|(line, _)| line.to_string())
            .collect()
    }

    /// Per-page text with boilerplate lines removed. A single page comes back untouched.
    pub fn strip_pages<S: AsRef<str>>(&self, pages: &[S]) -> Vec<String> {
        if pages.len() < 2 {
            return pages.iter().map(|p| p.as_ref().to_string()).collect();
        }
        let boilerplate = self.boilerplate_lines(pages);
        if !boilerplate.is_empty() {
            debug!(lines = boilerplate.len(), pages = pages.len(), "removing repeated header/footer lines");
        }
        pages
            .iter()
            .map(|page| {
                page.as_ref()
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !boilerplate.contains(*l))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }

    pub fn clean_text<S: AsRef<str>>(&self, pages: &[S]) -> String {
        self.strip_pages(pages).join("\n")
    }

    /// Machine-readable reason when an HTML fragment is navigation or chrome rather than content.
    pub fn structural_verdict(&self, element: ElementRef<'_>) -> Option<String> {
        let text = collapse_whitespace(&element.text().collect::<String>());
        if text.is_empty() {
            return Some("empty_text".to_string());
        }
        let text_len = text.chars().count();

        let link_len: usize = element
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "a")
            .map(|a| collapse_whitespace(&a.text().collect::<String>()).chars().count())
            .sum();
        let link_ratio = link_len as f64 / text_len as f64;
        if link_ratio > NAV_LINK_RATIO && text_len < NAV_LINK_MAX_LEN {
            return Some(format!("link_density:{link_ratio:.2}"));
        }

        for ancestor in element.ancestors().filter_map(ElementRef::wrap) {
            let tag = ancestor.value().name();
            if self.nav_container_tags.iter().any(|t| t == tag) {
                return Some(format!("inside_container:{tag}"));
            }
            if let Some(class) = ancestor.value().attr("class") {
                let class = class.to_lowercase();
                if let Some(hit) = self.nav_class_denylist.iter().find(|k| class.contains(k.as_str())) {
                    return Some(format!("nav_class:{hit}"));
                }
            }
        }

        if text_len < NAV_KEYWORD_MAX_LEN {
            let folded = fold_diacritics(&text).to_lowercase();
            let hit = folded
                .split(|c: char| !c.is_alphanumeric())
                .find(|token| self.nav_keywords.iter().any(|k| k == token));
            if let Some(keyword) = hit {
                return Some(format!("nav_keyword:{keyword}"));
            }
        }

        None
    }

    pub fn is_structural_garbage(&self, element: ElementRef<'_>) -> bool {
        self.structural_verdict(element).is_some()
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
