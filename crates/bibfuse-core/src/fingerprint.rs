//! Content-derived record fingerprints ("keyid")
//!
//! A fingerprint is derived from a record's normalized contributor surnames,
//! year, and its two least-frequent title words, measured against a
//! corpus-wide frequency table. Fingerprints cluster likely-duplicate
//! records; they are not unique. Collisions between unrelated records and
//! divergence between typo'd duplicates both happen and are handled
//! downstream.
//!
//! Fingerprinting is a two-pass algorithm: pass 1 builds the frequency
//! snapshot from every title in the batch, pass 2 computes fingerprints
//! against the finished snapshot. The snapshot is immutable once built.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::text::author::{parse_person_list, surname_key};
use crate::text::roman::romanize;
use crate::text::{strip_diacritics, uniqued, word_tokens};

/// Placeholder year token for records without a usable date
pub const NO_DATE: &str = "[nd]";

/// Canonical field order for the degenerate no-contributor fingerprint;
/// unlisted fields follow alphabetically.
const FIELD_ORDER: [&str; 15] = [
    "author",
    "editor",
    "title",
    "booktitle",
    "journal",
    "school",
    "publisher",
    "address",
    "series",
    "volume",
    "number",
    "pages",
    "year",
    "issn",
    "url",
];

lazy_static! {
    /// Bracketed year portion: digits with range/list separators
    static ref RE_BRACKET_YEAR: Regex = Regex::new(r"\[([\d,\-/]+)\]").unwrap();
    /// Year-list delimiters
    static ref RE_YEAR_SPLIT: Regex = Regex::new(r"[,\-/\s\[\]]+").unwrap();
    /// A title token usable for fingerprinting: starts with a letter,
    /// at least two characters
    static ref RE_WORD_TOKEN: Regex = Regex::new(r"^[a-zA-Z].").unwrap();
}

/// Immutable corpus-wide title-word frequency snapshot (pass 1)
#[derive(Debug, Clone, Default)]
pub struct WordFrequencies {
    counts: HashMap<String, u64>,
}

impl WordFrequencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the tokens of one title into the table (builder phase only)
    pub fn add_title(&mut self, title: &str) {
        for token in word_tokens(title) {
            *self.counts.entry(token).or_insert(0) += 1;
        }
    }

    pub fn from_titles<'a, I: IntoIterator<Item = &'a str>>(titles: I) -> Self {
        let mut freq = Self::new();
        for title in titles {
            freq.add_title(title);
        }
        freq
    }

    /// Unseen words rank as infinitely rare
    fn rank(&self, word: &str) -> u64 {
        self.counts.get(word).copied().unwrap_or(u64::MAX)
    }

    pub fn distinct_words(&self) -> usize {
        self.counts.len()
    }

    pub fn total_tokens(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Complete a shorthand range end against its start: ("34", "1931") -> "1934"
fn range_complete(incomplete: &str, complete: &str) -> String {
    if complete.len() > incomplete.len() {
        format!(
            "{}{}",
            &complete[..complete.len() - incomplete.len()],
            incomplete
        )
    } else {
        incomplete.to_string()
    }
}

/// Extract the year token: the bracketed digit portion if present, else the
/// first delimiter-split token; ranges are completed ("1931-34" ->
/// "1931-1934"); `[nd]` when nothing usable remains.
pub fn year_token(year_field: &str) -> String {
    let text = match RE_BRACKET_YEAR.captures(year_field) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(year_field),
        None => year_field,
    };
    let parts: Vec<&str> = RE_YEAR_SPLIT
        .split(text)
        .filter(|p| !p.trim().is_empty())
        .collect();
    match parts.len() {
        0 => NO_DATE.to_string(),
        1 => parts[0].to_string(),
        _ => format!(
            "{}-{}",
            parts[0],
            range_complete(parts[parts.len() - 1], parts[0])
        ),
    }
}

/// Keep only the fingerprint alphabet
fn sanitize(key: &str, replacement: Option<char>) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '[' | ']') {
            out.push(c);
        } else if let Some(r) = replacement {
            out.push(r);
        }
    }
    out
}

fn field_rank<'a>(key: &'a str) -> (usize, &'a str) {
    match FIELD_ORDER.iter().position(|f| *f == key) {
        Some(i) => (i, key),
        None => (FIELD_ORDER.len(), key),
    }
}

/// Fallback fingerprint for records with neither author nor editor: all
/// field values in canonical order under a reserved prefix. Exists only for
/// malformed records and cannot collide with normal fingerprints.
fn missing_contributor_keyid(fields: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = fields
        .keys()
        .filter(|k| k.as_str() != "glottolog_ref_id")
        .collect();
    keys.sort_by(|a, b| field_rank(a.as_str()).cmp(&field_rank(b.as_str())));
    let values: String = keys.iter().map(|k| fields[*k].as_str()).collect();
    format!(
        "__missingcontrib__{}",
        sanitize(&values.to_lowercase(), Some('_'))
    )
}

/// Compute the fingerprint of one record against the frequency snapshot.
pub fn keyid(fields: &HashMap<String, String>, freq: &WordFrequencies) -> String {
    let contributors = match fields.get("author").or_else(|| fields.get("editor")) {
        Some(s) => s,
        None => return missing_contributor_keyid(fields),
    };

    let persons = parse_person_list(contributors);
    let mut surname_keys: Vec<String> =
        persons.iter().map(|p| surname_key(&p.surname)).collect();
    // Sorted before diacritic stripping; order-independent across
    // contributor reorderings
    surname_keys.sort();
    let surname_keys: Vec<String> =
        surname_keys.iter().map(|k| strip_diacritics(k)).collect();

    let mut year = {
        let token = year_token(fields.get("year").map(String::as_str).unwrap_or(NO_DATE));
        token.chars().take(4).collect::<String>()
    };
    if let Some(extra) = fields.get("extra_hash") {
        year.push_str(extra);
    }

    let title = fields.get("title").map(String::as_str).unwrap_or("no.title");
    let tokens: Vec<String> = uniqued(
        word_tokens(title)
            .into_iter()
            .filter(|w| RE_WORD_TOKEN.is_match(w)),
    );
    // The two least frequent distinct tokens; ties keep first-occurrence
    // order, and the selection is put back into title order afterwards
    // ("spam eggs" != "eggs spam")
    let mut indexed: Vec<usize> = (0..tokens.len()).collect();
    indexed.sort_by_key(|&i| (freq.rank(&tokens[i]), i));
    let mut selected: Vec<usize> = indexed.into_iter().take(2).collect();
    selected.sort_unstable();
    let title_part: Vec<&str> = selected.iter().map(|&i| tokens[i].as_str()).collect();

    let volume = if fields.contains_key("volume")
        && !fields.contains_key("journal")
        && !fields.contains_key("booktitle")
        && !fields.contains_key("series")
    {
        romanize(&fields["volume"])
    } else {
        String::new()
    };

    let key = format!(
        "{}_{}{}{}",
        surname_keys.join("-"),
        title_part.join("-"),
        volume,
        year
    );
    sanitize(&key.to_lowercase(), None)
}
