//! String similarity in 0..=1 built on `strsim`'s normalized Levenshtein distance.

use std::collections::BTreeSet;

use acf_core::fold_diacritics;
use strsim::normalized_levenshtein;

/// Lowercase, diacritic-free, punctuation replaced by spaces, whitespace collapsed.
pub fn normalize_name(input: &str) -> String {
    fold_diacritics(input)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b)
}

/// Best alignment of the shorter string against every same-length window of the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() { (a, b) } else { (b, a) };
    let short_len = short.chars().count();
    if short_len == 0 {
        return 0.0;
    }
    let long_chars: Vec<char> = long.chars().collect();
    let mut best = 0.0_f64;
    for start in 0..=(long_chars.len() - short_len) {
        let window: String = long_chars[start..start + short_len].iter().collect();
        best = best.max(ratio(short, &window));
        if best >= 1.0 {
            break;
        }
    }
    best
}

/// Compares the shared tokens against each side's full token set, so word order and
/// extra qualifiers on one side do not count against the pair.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();
    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 1.0;
    }

    let shared = common.join(" ");
    let combined_a = join_nonempty(&shared, &only_a.join(" "));
    let combined_b = join_nonempty(&shared, &only_b.join(" "));
    let mut best = ratio(&combined_a, &combined_b);
    if !shared.is_empty() {
        best = best.max(ratio(&shared, &combined_a)).max(ratio(&shared, &combined_b));
    }
    best
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left} {right}"),
    }
}
