//! Rule-based enrichment of merged entries
//!
//! Two modes. Trigger rules map (field, label) to a disjunction of
//! conjunctive clauses over signed title words; an entry lacking the field
//! gets the label only when exactly one candidate label matches, with a
//! provenance note naming the clause that fired. Lookup-table mode injects
//! `macro_area` from a language-code table.
//!
//! Inference never overrules ground truth: an inferred document type that
//! would raise a language's descriptive status above what the authoritative
//! source asserts is reverted and reported.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::merge::LogicalEntry;
use crate::text::word_tokens;

/// Document-type ladder, least to most descriptive. Annotation must never
/// push a language above the rank its authoritative entries already have.
const HHTYPE_RANKS: [(&str, i32); 16] = [
    ("unknown", 1),
    ("bibliographical", 2),
    ("ethnographic", 3),
    ("overview", 4),
    ("dialectology", 5),
    ("socling", 6),
    ("minimal", 8),
    ("comparative", 9),
    ("wordlist", 10),
    ("new_testament", 11),
    ("text", 12),
    ("phonology", 13),
    ("specific_feature", 14),
    ("dictionary", 15),
    ("grammar_sketch", 16),
    ("grammar", 17),
];

pub fn hhtype_rank(name: &str) -> i32 {
    HHTYPE_RANKS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, r)| *r)
        .unwrap_or(1)
}

lazy_static! {
    static ref RE_PAREN: Regex = Regex::new(r" \([^)]*\)").unwrap();
    static ref RE_VALUE_SPLIT: Regex = Regex::new(r"[;,]\s?").unwrap();
    static ref RE_ISO_BRACKET: Regex =
        Regex::new(r"\[([a-z]{3}|NOCODE_[A-Z][^\s\]]+)\]").unwrap();
    static ref RE_CODE_SPLIT: Regex = Regex::new(r"[,/]\s?").unwrap();
    static ref RE_ISO: Regex = Regex::new(r"^(?:[a-z]{3}|NOCODE_[A-Z][^\s\]]+)$").unwrap();
}

/// Split a multi-valued document-type field, dropping provenance
/// parentheticals
pub fn split_hhtype(value: &str) -> Vec<String> {
    let cleaned = RE_PAREN.replace_all(value, "");
    RE_VALUE_SPLIT
        .split(&cleaned)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Language codes of an `lgcode` field value: bracketed ISO-639-3 or
/// NOCODE tokens; bare comma-separated codes count only when every part
/// parses as a code.
pub fn parse_lgcodes(value: &str) -> Vec<String> {
    let bracketed: Vec<String> = RE_ISO_BRACKET
        .captures_iter(value)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect();
    if !bracketed.is_empty() {
        return bracketed;
    }
    let parts: Vec<&str> = RE_CODE_SPLIT
        .split(value)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let codes: Vec<String> = parts
        .iter()
        .filter(|p| RE_ISO.is_match(p))
        .map(|p| p.to_string())
        .collect();
    if codes.len() == parts.len() {
        codes
    } else {
        Vec::new()
    }
}

/// One conjunctive clause: every positive word present, every negative
/// word absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerClause {
    terms: Vec<(bool, String)>,
}

impl TriggerClause {
    /// Parse "grammatik AND NOT sketch"
    fn parse(text: &str) -> Self {
        let terms = text
            .split(" AND ")
            .map(|term| {
                let term = term.trim();
                match term.strip_prefix("NOT ") {
                    Some(word) => (false, word.trim().to_string()),
                    None => (true, term.to_string()),
                }
            })
            .collect();
        Self { terms }
    }

    fn matches(&self, words: &BTreeSet<String>) -> bool {
        self.terms
            .iter()
            .all(|(positive, word)| *positive == words.contains(word))
    }

    fn render(&self) -> String {
        self.terms
            .iter()
            .map(|(positive, word)| {
                if *positive {
                    word.clone()
                } else {
                    format!("not {word}")
                }
            })
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

#[derive(Debug, Clone)]
struct Rule {
    field: String,
    label: String,
    clauses: Vec<TriggerClause>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    field: String,
    label: String,
    triggers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rule: Vec<RuleSpec>,
}

/// The loaded trigger rule set
#[derive(Debug, Clone, Default)]
pub struct TriggerRules {
    rules: Vec<Rule>,
}

impl TriggerRules {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(text)?;
        Ok(Self {
            rules: file
                .rule
                .into_iter()
                .map(|spec| Rule {
                    field: spec.field,
                    label: spec.label,
                    clauses: spec.triggers.iter().map(|t| TriggerClause::parse(t)).collect(),
                })
                .collect(),
        })
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    fn fields(&self) -> BTreeSet<&str> {
        self.rules.iter().map(|r| r.field.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Apply trigger rules to every entry lacking the target field. An entry is
/// annotated only when exactly one label matches; the provenance note
/// records every clause that fired. Returns (entry id, field) pairs for the
/// conservative guard.
pub fn annotate_with_triggers(
    entries: &mut BTreeMap<i64, LogicalEntry>,
    rules: &TriggerRules,
) -> Vec<(i64, String)> {
    let fields = rules.fields();
    let mut assigned = Vec::new();

    for (&id, entry) in entries.iter_mut() {
        let Some(title) = entry.fields.get("title") else {
            continue;
        };
        let words: BTreeSet<String> = word_tokens(title).into_iter().collect();

        for field in &fields {
            if entry.fields.contains_key(*field) {
                continue;
            }
            // label -> clauses that fired
            let mut hits: Vec<(&str, Vec<&TriggerClause>)> = Vec::new();
            for rule in rules.rules.iter().filter(|r| r.field == *field) {
                let fired: Vec<&TriggerClause> =
                    rule.clauses.iter().filter(|c| c.matches(&words)).collect();
                if !fired.is_empty() {
                    match hits.iter_mut().find(|(l, _)| *l == rule.label.as_str()) {
                        Some((_, clauses)) => clauses.extend(fired),
                        None => hits.push((rule.label.as_str(), fired)),
                    }
                }
            }
            if hits.len() != 1 {
                continue;
            }
            let (label, clauses) = &hits[0];
            let provenance = clauses
                .iter()
                .map(|c| c.render())
                .collect::<Vec<_>>()
                .join("; ");
            entry.fields.insert(
                field.to_string(),
                format!("{label} (computerized assignment from \"{provenance}\")"),
            );
            assigned.push((id, field.to_string()));
        }
    }

    info!(count = assigned.len(), "trigger annotations assigned");
    assigned
}

/// Best descriptive status per language over (lgcode, hhtype) field pairs
/// of the authoritative source's records.
pub fn language_status<'a, I>(items: I) -> HashMap<String, i32>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut status: HashMap<String, i32> = HashMap::new();
    for (lgcode_value, hhtype_value) in items {
        let rank = split_hhtype(hhtype_value)
            .iter()
            .map(|t| hhtype_rank(t))
            .max()
            .unwrap_or(1);
        for code in parse_lgcodes(lgcode_value) {
            let slot = status.entry(code).or_insert(rank);
            if rank > *slot {
                *slot = rank;
            }
        }
    }
    status
}

/// Revert inferred document types that would raise a language's
/// descriptive status above the authoritative level. Returns the number of
/// reverted assignments.
pub fn revert_inferred_upgrades(
    entries: &mut BTreeMap<i64, LogicalEntry>,
    assigned: &[(i64, String)],
    authoritative: &HashMap<String, i32>,
) -> usize {
    let mut reverted = 0;
    for (id, field) in assigned {
        if field != "hhtype" {
            continue;
        }
        let Some(entry) = entries.get_mut(id) else {
            continue;
        };
        let Some(value) = entry.fields.get(field) else {
            continue;
        };
        let inferred_rank = split_hhtype(value)
            .iter()
            .map(|t| hhtype_rank(t))
            .max()
            .unwrap_or(1);
        let codes = entry
            .fields
            .get("lgcode")
            .map(|v| parse_lgcodes(v))
            .unwrap_or_default();
        let mut upgrade = false;
        for code in &codes {
            match authoritative.get(code) {
                Some(auth_rank) if inferred_rank > *auth_rank => {
                    upgrade = true;
                    break;
                }
                Some(_) => {}
                None => {
                    warn!(id = *id, code = %code, "language lacks authoritative status");
                }
            }
        }
        if upgrade {
            entry.fields.remove(field);
            reverted += 1;
            warn!(id = *id, "reverted inferred status upgrade");
        }
    }
    if reverted > 0 {
        info!(reverted, "conservative guard reverted annotations");
    }
    reverted
}

/// Load the language-code -> macro-area table. The key is the first
/// column; the macro-area column is located by header name.
pub fn load_language_info(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = headers
        .iter()
        .position(|h| h == "macro_area")
        .ok_or_else(|| Error::Config("language info table lacks macro_area column".into()))?;
    let mut table = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let (Some(code), Some(area)) = (record.get(0), record.get(column)) else {
            continue;
        };
        if !area.is_empty() {
            table.insert(code.to_string(), area.to_string());
        }
    }
    Ok(table)
}

/// Inject `macro_area` as the sorted union of the macro-areas of an
/// entry's language codes, only where the field is absent.
pub fn inject_macro_area(
    entries: &mut BTreeMap<i64, LogicalEntry>,
    language_info: &HashMap<String, String>,
) -> usize {
    let mut annotated = 0;
    for entry in entries.values_mut() {
        if entry.fields.contains_key("macro_area") {
            continue;
        }
        let Some(lgcode) = entry.fields.get("lgcode") else {
            continue;
        };
        let areas: BTreeSet<&str> = parse_lgcodes(lgcode)
            .iter()
            .filter_map(|code| language_info.get(code))
            .map(String::as_str)
            .collect();
        if !areas.is_empty() {
            entry.fields.insert(
                "macro_area".to_string(),
                areas.into_iter().collect::<Vec<_>>().join(", "),
            );
            annotated += 1;
        }
    }
    info!(count = annotated, "macro_area annotations assigned");
    annotated
}
