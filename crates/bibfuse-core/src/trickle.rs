//! Trickle-back: burning accepted values into the source files
//!
//! After resolution, selected fields of each logical entry (by default the
//! persistent identifier) are written back into every contributing source
//! record, so identifiers survive the next run no matter how fingerprints
//! drift. Writes happen only where the source value differs; a second run
//! with no intervening changes writes nothing. A vanished source record is
//! a warning, never a failure, and one broken file does not stop the rest.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::Collection;
use crate::error::Result;
use crate::merge::LogicalEntry;

/// Fields synced back when the caller does not choose
pub const DEFAULT_TRICKLE_FIELDS: [&str; 1] = ["glottolog_ref_id"];

#[derive(Debug, Clone, Default)]
pub struct TrickleReport {
    pub files_written: usize,
    pub records_updated: usize,
    pub warnings: Vec<String>,
}

pub fn trickle_back(
    collection: &Collection,
    entries: &BTreeMap<i64, LogicalEntry>,
    fields: &[&str],
) -> Result<TrickleReport> {
    // filename -> (bibkey, field, value), grouped so each file is rewritten
    // at most once
    let mut updates: BTreeMap<String, Vec<(String, String, String)>> = BTreeMap::new();
    for entry in entries.values() {
        for target in &entry.srctrickle {
            let Some((filename, bibkey)) = target.split_once('#') else {
                continue;
            };
            for field in fields {
                if let Some(value) = entry.fields.get(*field) {
                    updates.entry(filename.to_string()).or_default().push((
                        bibkey.to_string(),
                        field.to_string(),
                        value.clone(),
                    ));
                }
            }
        }
    }

    let mut report = TrickleReport::default();
    for (filename, file_updates) in updates {
        let Some(bibfile) = collection.get(&filename) else {
            report
                .warnings
                .push(format!("{filename}: not in the source collection"));
            continue;
        };
        let mut parsed = match bibfile.load() {
            Ok(parsed) => parsed,
            Err(err) => {
                report.warnings.push(format!("{filename}: {err}"));
                continue;
            }
        };

        let mut dirty = false;
        for (bibkey, field, value) in file_updates {
            match parsed.entries.iter_mut().find(|e| e.cite_key == bibkey) {
                Some(entry) => {
                    if entry.get_field(&field) != Some(value.as_str()) {
                        entry.set_field(&field, value);
                        report.records_updated += 1;
                        dirty = true;
                    }
                }
                None => {
                    let message = format!("{filename}#{bibkey}: trickle target vanished");
                    warn!("{message}");
                    report.warnings.push(message);
                }
            }
        }

        if dirty {
            if let Err(err) = bibfile.save(&parsed.entries) {
                report.warnings.push(format!("{filename}: {err}"));
                continue;
            }
            report.files_written += 1;
        }
    }

    info!(
        files = report.files_written,
        records = report.records_updated,
        warnings = report.warnings.len(),
        "trickled fields back into sources"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Collection;
    use std::collections::HashMap;
    use std::fs;

    fn logical(id: i64, trickle: &[&str]) -> LogicalEntry {
        let mut fields = HashMap::new();
        fields.insert("glottolog_ref_id".to_string(), id.to_string());
        LogicalEntry {
            entry_type: "book".to_string(),
            fields,
            src: Vec::new(),
            srctrickle: trickle.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_trickle_writes_id_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.bib"),
            "@book{a1,\n    title = {T}\n}\n",
        )
        .unwrap();
        let collection = Collection::from_dir(dir.path(), None).unwrap();
        let entries = BTreeMap::from([(300_001, logical(300_001, &["a.bib#a1"]))]);

        let report =
            trickle_back(&collection, &entries, &DEFAULT_TRICKLE_FIELDS).unwrap();
        assert_eq!(report.files_written, 1);
        assert_eq!(report.records_updated, 1);
        assert!(report.warnings.is_empty());

        let written = fs::read_to_string(dir.path().join("a.bib")).unwrap();
        assert!(written.contains("glottolog_ref_id = 300001"));
        assert!(dir.path().join("a.bib.bak").exists());
    }

    #[test]
    fn test_trickle_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.bib"),
            "@book{a1,\n    title = {T}\n}\n",
        )
        .unwrap();
        let collection = Collection::from_dir(dir.path(), None).unwrap();
        let entries = BTreeMap::from([(300_001, logical(300_001, &["a.bib#a1"]))]);

        trickle_back(&collection, &entries, &DEFAULT_TRICKLE_FIELDS).unwrap();
        let after_first = fs::read_to_string(dir.path().join("a.bib")).unwrap();

        let report =
            trickle_back(&collection, &entries, &DEFAULT_TRICKLE_FIELDS).unwrap();
        assert_eq!(report.files_written, 0);
        assert_eq!(report.records_updated, 0);
        let after_second = fs::read_to_string(dir.path().join("a.bib")).unwrap();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_vanished_target_warns_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.bib"),
            "@book{present,\n    title = {T}\n}\n",
        )
        .unwrap();
        let collection = Collection::from_dir(dir.path(), None).unwrap();
        let entries = BTreeMap::from([
            (300_001, logical(300_001, &["a.bib#gone"])),
            (300_002, logical(300_002, &["a.bib#present"])),
        ]);

        let report =
            trickle_back(&collection, &entries, &DEFAULT_TRICKLE_FIELDS).unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("a.bib#gone"));
        assert_eq!(report.records_updated, 1);
    }
}
