//! Cluster merging
//!
//! Fuses all records sharing one fingerprint into a single logical entry.
//! Union fields concatenate every distinct contributing value; every other
//! field takes the value of the highest-priority record that defines it.
//! Merging is deterministic and idempotent: same cluster membership and
//! record contents always produce byte-identical output.

use std::collections::{BTreeSet, HashMap};

use crate::store::{FieldGroup, ENTRYTYPE_FIELD};

/// Fields whose merged value is the union of all distinct contributing
/// values rather than a single prioritized pick
pub const UNION_FIELDS: [&str; 5] = ["lgcode", "fn", "asjp_name", "hhtype", "isbn"];

/// The merged representation of one fingerprint cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalEntry {
    pub entry_type: String,
    pub fields: HashMap<String, String>,
    /// Distinct contributing source filenames, sorted
    pub src: Vec<String>,
    /// Every contributing record as "filename#bibkey", sorted; the join key
    /// for trickle-back
    pub srctrickle: Vec<String>,
}

impl LogicalEntry {
    pub fn src_field(&self) -> String {
        self.src.join(", ")
    }

    pub fn srctrickle_field(&self) -> String {
        self.srctrickle.join(", ")
    }
}

/// Case-insensitive first-seen-order dedup of union-field values
fn union_value(values: &[crate::store::SourcedValue]) -> String {
    let mut seen = BTreeSet::new();
    let mut out: Vec<&str> = Vec::new();
    for v in values {
        if seen.insert(v.value.to_lowercase()) {
            out.push(&v.value);
        }
    }
    out.join(", ")
}

/// Majority vote over the cluster's entry types. The groups arrive priority-
/// ordered, so a tie resolves to the tied type whose best record sorts first
/// under the (priority, filename, bibkey) total order.
fn vote_entry_type(values: &[crate::store::SourcedValue]) -> String {
    let mut counts: Vec<(String, usize, usize)> = Vec::new();
    for (pos, v) in values.iter().enumerate() {
        match counts.iter_mut().find(|(t, _, _)| *t == v.value) {
            Some((_, n, _)) => *n += 1,
            None => counts.push((v.value.clone(), 1, pos)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    counts
        .into_iter()
        .next()
        .map(|(t, _, _)| t)
        .unwrap_or_else(|| "misc".to_string())
}

/// Merge one cluster's priority-ordered field groups into a logical entry.
pub fn merge_cluster(groups: &[FieldGroup], union_fields: &[&str]) -> LogicalEntry {
    let mut entry_type = String::from("misc");
    let mut fields = HashMap::new();
    let mut src = BTreeSet::new();
    let mut srctrickle = BTreeSet::new();

    for group in groups {
        for v in &group.values {
            src.insert(v.filename.clone());
            srctrickle.insert(format!("{}#{}", v.filename, v.bibkey));
        }
        if group.field == ENTRYTYPE_FIELD {
            entry_type = vote_entry_type(&group.values);
        } else if union_fields.contains(&group.field.as_str()) {
            fields.insert(group.field.clone(), union_value(&group.values));
        } else if let Some(first) = group.values.first() {
            fields.insert(group.field.clone(), first.value.clone());
        }
    }

    LogicalEntry {
        entry_type,
        fields,
        src: src.into_iter().collect(),
        srctrickle: srctrickle.into_iter().collect(),
    }
}
