//! BibTeX formatting
//!
//! Serializes entries back to BibTeX text with a canonical field ordering,
//! so that repeated writes of unchanged data are byte-identical.

use std::collections::HashMap;

use super::entry::BibEntry;

/// Canonical field output order; fields not listed sort after these,
/// alphabetically.
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

/// How entries are ordered within a written file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Keep the order the entries were given in
    #[default]
    None,
    /// Sort by cite key (case-insensitive)
    Bibkey,
    /// Sort by author field, then cite key
    Author,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "bibkey" => Some(Self::Bibkey),
            "author" => Some(Self::Author),
            _ => None,
        }
    }
}

fn field_rank(key: &str) -> (usize, &str) {
    match FIELD_ORDER.iter().position(|f| *f == key) {
        Some(i) => (i, key),
        None => (FIELD_ORDER.len(), key),
    }
}

/// Format a single entry with canonical field ordering
pub fn format_entry(entry: &BibEntry) -> String {
    let mut result = String::new();

    result.push('@');
    result.push_str(&entry.entry_type);
    result.push('{');
    result.push_str(&entry.cite_key);

    let mut fields: Vec<_> = entry.fields.iter().collect();
    fields.sort_by(|a, b| field_rank(&a.key).cmp(&field_rank(&b.key)));

    for field in fields {
        result.push_str(",\n    ");
        result.push_str(&field.key);
        result.push_str(" = ");
        result.push_str(&format_field_value(&field.value));
    }

    result.push_str("\n}\n");
    result
}

/// Format a whole file worth of entries under the given sort key
pub fn format_entries(entries: &[BibEntry], sortkey: SortKey) -> String {
    let mut ordered: Vec<&BibEntry> = entries.iter().collect();
    match sortkey {
        SortKey::None => {}
        SortKey::Bibkey => ordered.sort_by_key(|e| e.cite_key.to_lowercase()),
        SortKey::Author => ordered.sort_by_key(|e| {
            (
                e.author().unwrap_or("").to_string(),
                e.cite_key.to_lowercase(),
            )
        }),
    }
    ordered
        .iter()
        .map(|e| format_entry(e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Braces for everything except purely numeric values
fn format_field_value(value: &str) -> String {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        return value.to_string();
    }
    let mut result = String::with_capacity(value.len() + 2);
    result.push('{');
    result.push_str(value);
    result.push('}');
    result
}

/// Build an entry from a field map, for callers that assemble entries
/// field-by-field (the merged-output writer).
pub fn entry_from_fields(
    cite_key: impl Into<String>,
    entry_type: impl Into<String>,
    fields: &HashMap<String, String>,
) -> BibEntry {
    let mut entry = BibEntry::new(cite_key, entry_type);
    let mut keys: Vec<_> = fields.keys().collect();
    keys.sort_by(|a, b| field_rank(a.as_str()).cmp(&field_rank(b.as_str())));
    for key in keys {
        entry.add_field(key.clone(), fields[key].clone());
    }
    entry
}
