//! SQLite-backed record store
//!
//! Staging area for all raw per-(source, key) field values, indexed by
//! fingerprint and persistent identifier. Written during import and the
//! final identifier update only; every other phase reads. Retrieval of a
//! fingerprint's records is priority-ordered: per-field override if present,
//! else file priority, descending, ties broken by filename then bibkey so
//! results never depend on file read order.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use bibfuse_bibtex::BibEntry;

use crate::error::{Error, Result};
use crate::fingerprint::{keyid, WordFrequencies};

/// Pseudo-field under which an entry's type is staged, so that the type
/// participates in priority-ordered merging like any other field. Uppercase
/// keeps it disjoint from the case-normalized real field names.
pub const ENTRYTYPE_FIELD: &str = "ENTRYTYPE";

/// One field value with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedValue {
    pub value: String,
    pub filename: String,
    pub bibkey: String,
}

/// All values for one field across a cluster, highest priority first
#[derive(Debug, Clone)]
pub struct FieldGroup {
    pub field: String,
    pub values: Vec<SourcedValue>,
}

/// Identity-relevant columns of one staged record
#[derive(Debug, Clone)]
pub struct EntryRow {
    pub filename: String,
    pub bibkey: String,
    pub refid: Option<i64>,
    pub hash: String,
}

/// Counters reported after import/fingerprinting, useful as regression
/// signals
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub entries_total: i64,
    pub per_file: Vec<(String, i64)>,
    pub distinct_hashes: i64,
    pub in_multiple_files: i64,
}

pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store, used by tests and one-shot runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA synchronous = OFF;
            PRAGMA journal_mode = MEMORY;

            CREATE TABLE IF NOT EXISTS file (
                name TEXT NOT NULL,
                priority INTEGER NOT NULL,
                PRIMARY KEY (name)
            );
            CREATE TABLE IF NOT EXISTS field (
                filename TEXT NOT NULL,
                field TEXT NOT NULL,
                priority INTEGER NOT NULL,
                PRIMARY KEY (filename, field),
                FOREIGN KEY (filename) REFERENCES file(name)
            );
            CREATE TABLE IF NOT EXISTS entry (
                filename TEXT NOT NULL,
                bibkey TEXT NOT NULL,
                refid INTEGER,
                hash TEXT,
                id INTEGER,
                PRIMARY KEY (filename, bibkey),
                FOREIGN KEY (filename) REFERENCES file(name)
            );
            CREATE INDEX IF NOT EXISTS ix_refid ON entry(refid);
            CREATE INDEX IF NOT EXISTS ix_hash ON entry(hash);
            CREATE INDEX IF NOT EXISTS ix_id ON entry(id);
            CREATE TABLE IF NOT EXISTS value (
                filename TEXT NOT NULL,
                bibkey TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (filename, bibkey, field),
                FOREIGN KEY (filename, bibkey) REFERENCES entry(filename, bibkey)
            );
            ",
        )?;
        Ok(Self { conn })
    }

    /// Stage one source file's records. The inherited persistent identifier
    /// (field `glottolog_ref_id`) is lifted into the entry row.
    pub fn import_file(
        &mut self,
        filename: &str,
        priority: i64,
        field_priorities: &BTreeMap<String, i64>,
        entries: &[BibEntry],
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO file (name, priority) VALUES (?1, ?2)",
            params![filename, priority],
        )?;
        for (field, prio) in field_priorities {
            tx.execute(
                "INSERT INTO field (filename, field, priority) VALUES (?1, ?2, ?3)",
                params![filename, field, prio],
            )?;
        }
        for entry in entries {
            let refid = entry
                .get_field("glottolog_ref_id")
                .and_then(|v| v.trim().parse::<i64>().ok());
            // Last occurrence wins when a source file repeats a bibkey
            tx.execute(
                "INSERT OR REPLACE INTO entry (filename, bibkey, refid) VALUES (?1, ?2, ?3)",
                params![filename, entry.cite_key, refid],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO value (filename, bibkey, field, value) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![filename, entry.cite_key, ENTRYTYPE_FIELD, entry.entry_type],
            )?;
            for field in &entry.fields {
                tx.execute(
                    "INSERT OR REPLACE INTO value (filename, bibkey, field, value) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![filename, entry.cite_key, field.key, field.value],
                )?;
            }
        }
        tx.commit()?;
        debug!(filename, count = entries.len(), "imported source file");
        Ok(entries.len())
    }

    /// Pass 1 of fingerprinting: the corpus-wide title-word frequency
    /// snapshot.
    pub fn build_word_frequencies(&self) -> Result<WordFrequencies> {
        let mut freq = WordFrequencies::new();
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM value WHERE field = 'title'")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let title: String = row.get(0)?;
            freq.add_title(&title);
        }
        info!(
            words = freq.distinct_words(),
            tokens = freq.total_tokens(),
            "built title word frequencies"
        );
        Ok(freq)
    }

    /// Pass 2: compute and stage every record's fingerprint, windowed by
    /// (filename, bibkey) to bound memory.
    pub fn generate_hashes(&mut self, freq: &WordFrequencies) -> Result<u64> {
        let windows = self.bibkey_windows(500)?;
        let mut hashed = 0u64;
        for (filename, first, last) in windows {
            let mut grouped: BTreeMap<String, std::collections::HashMap<String, String>> =
                BTreeMap::new();
            {
                let mut stmt = self.conn.prepare(
                    "SELECT bibkey, field, value FROM value \
                     WHERE filename = ?1 AND bibkey BETWEEN ?2 AND ?3 \
                     ORDER BY bibkey",
                )?;
                let mut rows = stmt.query(params![filename, first, last])?;
                while let Some(row) = rows.next()? {
                    let bibkey: String = row.get(0)?;
                    let field: String = row.get(1)?;
                    let value: String = row.get(2)?;
                    grouped.entry(bibkey).or_default().insert(field, value);
                }
            }
            let tx = self.conn.transaction()?;
            for (bibkey, mut fields) in grouped {
                fields.remove(ENTRYTYPE_FIELD);
                let hash = keyid(&fields, freq);
                tx.execute(
                    "UPDATE entry SET hash = ?1 WHERE filename = ?2 AND bibkey = ?3",
                    params![hash, filename, bibkey],
                )?;
                hashed += 1;
            }
            tx.commit()?;
        }
        Ok(hashed)
    }

    /// (filename, first-bibkey, last-bibkey) windows covering every record
    fn bibkey_windows(&self, chunk: usize) -> Result<Vec<(String, String, String)>> {
        let mut windows = Vec::new();
        let filenames: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT name FROM file ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        for filename in filenames {
            let bibkeys: Vec<String> = {
                let mut stmt = self.conn.prepare(
                    "SELECT bibkey FROM entry WHERE filename = ?1 ORDER BY bibkey",
                )?;
                let rows = stmt.query_map(params![filename], |row| row.get(0))?;
                rows.collect::<std::result::Result<_, _>>()?
            };
            for slice in bibkeys.chunks(chunk) {
                if let (Some(first), Some(last)) = (slice.first(), slice.last()) {
                    windows.push((filename.clone(), first.clone(), last.clone()));
                }
            }
        }
        Ok(windows)
    }

    /// All identity-relevant rows, ordered (filename, bibkey)
    pub fn entry_rows(&self) -> Result<Vec<EntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT filename, bibkey, refid, hash FROM entry ORDER BY filename, bibkey",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EntryRow {
                filename: row.get(0)?,
                bibkey: row.get(1)?,
                refid: row.get(2)?,
                hash: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// All of a fingerprint's field values, grouped by field, priority order
    pub fn cluster_by_hash(&self, hash: &str) -> Result<Vec<FieldGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.field, v.value, v.filename, v.bibkey \
             FROM entry AS e \
             JOIN file AS f ON e.filename = f.name \
             JOIN value AS v ON e.filename = v.filename AND e.bibkey = v.bibkey \
             LEFT JOIN field AS d ON v.filename = d.filename AND v.field = d.field \
             WHERE e.hash = ?1 \
             ORDER BY v.field, coalesce(d.priority, f.priority) DESC, v.filename, v.bibkey",
        )?;
        let mut rows = stmt.query(params![hash])?;
        Self::collect_field_groups(&mut rows)
    }

    fn collect_field_groups(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<FieldGroup>> {
        let mut groups: Vec<FieldGroup> = Vec::new();
        while let Some(row) = rows.next()? {
            let field: String = row.get(0)?;
            let value = SourcedValue {
                value: row.get(1)?,
                filename: row.get(2)?,
                bibkey: row.get(3)?,
            };
            match groups.last_mut() {
                Some(group) if group.field == field => group.values.push(value),
                _ => groups.push(FieldGroup {
                    field,
                    values: vec![value],
                }),
            }
        }
        Ok(groups)
    }

    /// Write the resolved identifier of every fingerprint
    pub fn apply_ids(&mut self, by_hash: &BTreeMap<String, i64>) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("UPDATE entry SET id = NULL", [])?;
        for (hash, id) in by_hash {
            tx.execute(
                "UPDATE entry SET id = ?1 WHERE hash = ?2",
                params![id, hash],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Post-resolution invariant: every entry has an id and the hash<->id
    /// mapping is one-to-one. A violation is a logic bug, not bad input.
    pub fn assert_bijection(&self) -> Result<()> {
        let unassigned: i64 = self.conn.query_row(
            "SELECT count(*) FROM entry WHERE id IS NULL",
            [],
            |row| row.get(0),
        )?;
        if unassigned > 0 {
            return Err(Error::IdentityBijection(format!(
                "{unassigned} entries left without an identifier"
            )));
        }
        let violations: i64 = self.conn.query_row(
            "SELECT count(*) FROM entry AS e WHERE EXISTS (SELECT 1 FROM entry \
             WHERE hash = e.hash AND id != e.id OR id = e.id AND hash != e.hash)",
            [],
            |row| row.get(0),
        )?;
        if violations > 0 {
            return Err(Error::IdentityBijection(format!(
                "{violations} entries with conflicting fingerprint/identifier pairs"
            )));
        }
        Ok(())
    }

    /// (first, last) identifier windows for memory-bounded merged iteration
    pub fn id_windows(&self, chunk: usize) -> Result<Vec<(i64, i64)>> {
        let ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT DISTINCT id FROM entry WHERE id IS NOT NULL ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        Ok(ids
            .chunks(chunk)
            .filter_map(|slice| Some((*slice.first()?, *slice.last()?)))
            .collect())
    }

    /// All clusters whose identifier falls in [first, last]:
    /// (id, hash, priority-ordered field groups)
    pub fn clusters_between(
        &self,
        first: i64,
        last: i64,
    ) -> Result<Vec<(i64, String, Vec<FieldGroup>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.hash, v.field, v.value, v.filename, v.bibkey \
             FROM entry AS e \
             JOIN file AS f ON e.filename = f.name \
             JOIN value AS v ON e.filename = v.filename AND e.bibkey = v.bibkey \
             LEFT JOIN field AS d ON v.filename = d.filename AND v.field = d.field \
             WHERE e.id BETWEEN ?1 AND ?2 \
             ORDER BY e.id, v.field, coalesce(d.priority, f.priority) DESC, v.filename, v.bibkey",
        )?;
        let mut rows = stmt.query(params![first, last])?;

        let mut clusters: Vec<(i64, String, Vec<FieldGroup>)> = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let hash: String = row.get(1)?;
            let field: String = row.get(2)?;
            let value = SourcedValue {
                value: row.get(3)?,
                filename: row.get(4)?,
                bibkey: row.get(5)?,
            };
            if clusters.last().map(|(i, _, _)| *i) != Some(id) {
                clusters.push((id, hash, Vec::new()));
            }
            if let Some((_, _, groups)) = clusters.last_mut() {
                match groups.last_mut() {
                    Some(group) if group.field == field => group.values.push(value),
                    _ => groups.push(FieldGroup {
                        field,
                        values: vec![value],
                    }),
                }
            }
        }
        Ok(clusters)
    }

    /// Import/fingerprint counters, logged and returned
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        stats.entries_total = self
            .conn
            .query_row("SELECT count(*) FROM entry", [], |row| row.get(0))?;
        {
            let mut stmt = self.conn.prepare(
                "SELECT filename, count(*) FROM entry GROUP BY filename ORDER BY filename",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            stats.per_file = rows.collect::<std::result::Result<_, _>>()?;
        }
        stats.distinct_hashes = self.conn.query_row(
            "SELECT count(DISTINCT hash) FROM entry WHERE hash IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        stats.in_multiple_files = self.conn.query_row(
            "SELECT count(*) FROM (SELECT 1 FROM entry GROUP BY hash \
             HAVING count(DISTINCT filename) > 1)",
            [],
            |row| row.get(0),
        )?;

        for (filename, count) in &stats.per_file {
            info!(filename = %filename, count = *count, "entries per source");
        }
        info!(
            total = stats.entries_total,
            distinct = stats.distinct_hashes,
            multi_file = stats.in_multiple_files,
            "fingerprint stats"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, pairs: &[(&str, &str)]) -> BibEntry {
        let mut e = BibEntry::new(key, "book");
        for (k, v) in pairs {
            e.add_field(*k, *v);
        }
        e
    }

    fn two_file_store() -> RecordStore {
        let mut store = RecordStore::open_in_memory().unwrap();
        store
            .import_file(
                "a.bib",
                10,
                &BTreeMap::new(),
                &[entry(
                    "a1",
                    &[
                        ("author", "Doe, J."),
                        ("title", "A Grammar of X"),
                        ("year", "2001"),
                    ],
                )],
            )
            .unwrap();
        store
            .import_file(
                "b.bib",
                5,
                &BTreeMap::new(),
                &[entry(
                    "b1",
                    &[
                        ("author", "Doe, John"),
                        ("title", "A Grammar of X"),
                        ("year", "2001"),
                        ("lgcode", "[xyz]"),
                    ],
                )],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_identical_content_shares_hash() {
        let mut store = two_file_store();
        let freq = store.build_word_frequencies().unwrap();
        assert_eq!(store.generate_hashes(&freq).unwrap(), 2);

        let rows = store.entry_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hash, rows[1].hash);

        let stats = store.stats().unwrap();
        assert_eq!(stats.distinct_hashes, 1);
        assert_eq!(stats.in_multiple_files, 1);
    }

    #[test]
    fn test_cluster_priority_order() {
        let mut store = two_file_store();
        let freq = store.build_word_frequencies().unwrap();
        store.generate_hashes(&freq).unwrap();
        let hash = store.entry_rows().unwrap()[0].hash.clone();

        let groups = store.cluster_by_hash(&hash).unwrap();
        let author = groups.iter().find(|g| g.field == "author").unwrap();
        // a.bib has priority 10, b.bib 5
        assert_eq!(author.values[0].filename, "a.bib");
        assert_eq!(author.values[0].value, "Doe, J.");
        assert_eq!(author.values[1].filename, "b.bib");
    }

    #[test]
    fn test_field_priority_override_beats_file_priority() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store
            .import_file(
                "low.bib",
                1,
                &BTreeMap::from([("title".to_string(), 99)]),
                &[entry("k1", &[("author", "Doe, J."), ("title", "From Low")])],
            )
            .unwrap();
        store
            .import_file(
                "high.bib",
                10,
                &BTreeMap::new(),
                &[entry("k2", &[("author", "Doe, J."), ("title", "From Low")])],
            )
            .unwrap();
        let freq = store.build_word_frequencies().unwrap();
        store.generate_hashes(&freq).unwrap();
        let hash = store.entry_rows().unwrap()[0].hash.clone();

        let groups = store.cluster_by_hash(&hash).unwrap();
        let title = groups.iter().find(|g| g.field == "title").unwrap();
        assert_eq!(title.values[0].filename, "low.bib");
    }

    #[test]
    fn test_apply_ids_and_bijection() {
        let mut store = two_file_store();
        let freq = store.build_word_frequencies().unwrap();
        store.generate_hashes(&freq).unwrap();
        let hash = store.entry_rows().unwrap()[0].hash.clone();

        store
            .apply_ids(&BTreeMap::from([(hash, 300_001)]))
            .unwrap();
        store.assert_bijection().unwrap();

        let clusters = store.clusters_between(300_001, 300_001).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].0, 300_001);
    }

    #[test]
    fn test_bijection_fails_when_unassigned() {
        let mut store = two_file_store();
        let freq = store.build_word_frequencies().unwrap();
        store.generate_hashes(&freq).unwrap();
        let err = store.assert_bijection().unwrap_err();
        assert!(matches!(err, Error::IdentityBijection(_)));
    }

    #[test]
    fn test_refid_lifted_from_field() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store
            .import_file(
                "a.bib",
                0,
                &BTreeMap::new(),
                &[entry(
                    "k",
                    &[("author", "Doe, J."), ("glottolog_ref_id", "500")],
                )],
            )
            .unwrap();
        let rows = store.entry_rows().unwrap();
        assert_eq!(rows[0].refid, Some(500));
    }
}
