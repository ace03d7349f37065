//! Prior-run state
//!
//! The identity resolver is a pure function of (current clusters, prior
//! snapshot); this module is the snapshot side. A snapshot records, for
//! every logical entry of the previous run, its fingerprint, its persistent
//! identifier, and the three fields the split-resolution distance weighs
//! most (author, year, title).

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::merge::LogicalEntry;

/// Read-only view of the previous run's assignments
pub trait PriorState {
    /// The identifier the previous run assigned to this fingerprint
    fn identifier_by_fingerprint(&self, hash: &str) -> Option<i64>;
    /// The previous run's merged fields for this identifier
    fn prior_entry_fields(&self, refid: i64) -> Option<&HashMap<String, String>>;
}

/// First run: no prior assignments
#[derive(Debug, Default)]
pub struct EmptyPrior;

impl PriorState for EmptyPrior {
    fn identifier_by_fingerprint(&self, _hash: &str) -> Option<i64> {
        None
    }

    fn prior_entry_fields(&self, _refid: i64) -> Option<&HashMap<String, String>> {
        None
    }
}

/// Snapshot loaded from (or built for) the cross-run CSV file
#[derive(Debug, Default)]
pub struct Snapshot {
    by_hash: HashMap<String, i64>,
    by_refid: HashMap<i64, HashMap<String, String>>,
}

const SNAPSHOT_HEADER: [&str; 5] = ["hash", "id", "author", "year", "title"];

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hash: &str, refid: i64, fields: &HashMap<String, String>) {
        self.by_hash.insert(hash.to_string(), refid);
        let kept: HashMap<String, String> = ["author", "year", "title"]
            .iter()
            .filter_map(|k| fields.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        self.by_refid.insert(refid, kept);
    }

    /// Load the snapshot written by a previous run
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.iter().ne(SNAPSHOT_HEADER) {
            return Err(Error::Snapshot(format!(
                "unexpected snapshot columns: {:?}",
                headers
            )));
        }
        let mut snapshot = Self::new();
        for record in reader.records() {
            let record = record?;
            let hash = record.get(0).unwrap_or_default();
            let refid: i64 = record
                .get(1)
                .unwrap_or_default()
                .parse()
                .map_err(|_| Error::Snapshot(format!("bad id for hash {hash}")))?;
            let fields: HashMap<String, String> = SNAPSHOT_HEADER[2..]
                .iter()
                .zip(record.iter().skip(2))
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            snapshot.by_hash.insert(hash.to_string(), refid);
            snapshot.by_refid.insert(refid, fields);
        }
        Ok(snapshot)
    }

    /// Write the snapshot for the next run
    pub fn write_csv<'a, I>(path: &Path, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, i64, &'a LogicalEntry)>,
    {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(SNAPSHOT_HEADER)?;
        for (hash, refid, entry) in entries {
            let id_text = refid.to_string();
            writer.write_record([
                hash,
                id_text.as_str(),
                entry.fields.get("author").map(String::as_str).unwrap_or(""),
                entry.fields.get("year").map(String::as_str).unwrap_or(""),
                entry.fields.get("title").map(String::as_str).unwrap_or(""),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

impl PriorState for Snapshot {
    fn identifier_by_fingerprint(&self, hash: &str) -> Option<i64> {
        self.by_hash.get(hash).copied()
    }

    fn prior_entry_fields(&self, refid: i64) -> Option<&HashMap<String, String>> {
        self.by_refid.get(&refid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.csv");

        let entry = LogicalEntry {
            entry_type: "book".to_string(),
            fields: fields(&[
                ("author", "Smith, A."),
                ("year", "1990"),
                ("title", "Grammar of Foo"),
            ]),
            src: vec!["a.bib".to_string()],
            srctrickle: vec!["a.bib#x".to_string()],
        };
        Snapshot::write_csv(&path, [("smith_grammar-foo1990", 500, &entry)]).unwrap();

        let snapshot = Snapshot::from_csv(&path).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.identifier_by_fingerprint("smith_grammar-foo1990"),
            Some(500)
        );
        let prior = snapshot.prior_entry_fields(500).unwrap();
        assert_eq!(prior["title"], "Grammar of Foo");
    }

    #[test]
    fn test_snapshot_rejects_unknown_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(Snapshot::from_csv(&path).is_err());
    }
}
