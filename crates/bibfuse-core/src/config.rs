//! Source collection configuration
//!
//! A collection is a directory of .bib files plus a `bibfiles.toml` carrying
//! per-source metadata: priority (field tie-break weight), output sort key,
//! encoding, optional per-field priority overrides, and descriptive
//! name/title text. Files present in the directory but absent from the
//! config get defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use bibfuse_bibtex::{parse, BibEntry, BibParseResult, SortKey};

use crate::error::{Error, Result};

/// Bib files whose name marks them as retired iterations are skipped
fn is_excluded(filename: &str) -> bool {
    if let Some(stem) = filename.strip_suffix(".bib") {
        if let Some(prefix) = stem.strip_suffix("old") {
            return !prefix.is_empty();
        }
        // "fooldv2.bib" style retired versions
        if let Some(pos) = stem.rfind("old") {
            let tail = &stem[pos + 3..];
            return pos > 0 && tail.starts_with('v') && tail[1..].chars().all(|c| c.is_ascii_digit());
        }
    }
    false
}

/// Per-source options as they appear in bibfiles.toml
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SourceOptions {
    /// Decode charset of the file; anything but utf-8 is read lossily
    pub encoding: Option<String>,
    /// Output ordering: "bibkey", "author", or "none"
    pub sortkey: Option<String>,
    /// File-level field tie-break weight; higher wins
    pub priority: i64,
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub abbr: Option<String>,
    /// Route this file through an external parser instead of the built-in
    /// one. Recognized for interface compatibility; files are parsed with
    /// the built-in parser either way, in strict mode when set.
    pub use_external_parser: bool,
    /// Per-field priority overrides, beating the file-level priority
    pub field_priority: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct CollectionConfig {
    /// Abort the whole import on any parse error instead of skipping the
    /// offending record
    strict: bool,
    sources: BTreeMap<String, SourceOptions>,
}

/// One source .bib file with its options
#[derive(Debug, Clone)]
pub struct BibFile {
    pub path: PathBuf,
    pub filename: String,
    pub options: SourceOptions,
}

impl BibFile {
    pub fn sortkey(&self) -> SortKey {
        self.options
            .sortkey
            .as_deref()
            .and_then(SortKey::parse)
            .unwrap_or_default()
    }

    /// Read and parse the file. Parse errors are returned alongside the
    /// entries; the caller decides strict vs. degraded handling.
    pub fn load(&self) -> Result<BibParseResult> {
        let bytes = fs::read(&self.path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(parse(&text))
    }

    /// Rewrite the file from entries, backing up the previous version to a
    /// `.bak` sibling first.
    pub fn save(&self, entries: &[BibEntry]) -> Result<()> {
        let backup = self.path.with_extension("bib.bak");
        if self.path.exists() {
            fs::copy(&self.path, &backup)?;
        }
        let formatted = bibfuse_bibtex::format_entries(entries, self.sortkey());
        fs::write(&self.path, formatted)?;
        Ok(())
    }
}

/// The configured set of source files
#[derive(Debug)]
pub struct Collection {
    pub dir: PathBuf,
    pub strict: bool,
    files: Vec<BibFile>,
}

impl Collection {
    /// Scan `dir` for .bib files and attach options from the config file
    /// (if present). Retired "*old.bib"/"*oldvN.bib" files are skipped.
    pub fn from_dir(dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config: CollectionConfig = match config_path {
            Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
            None => CollectionConfig::default(),
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !filename.ends_with(".bib") || is_excluded(filename) {
                continue;
            }
            let filename = filename.to_string();
            let options = config.sources.get(&filename).cloned().unwrap_or_default();
            if let Some(encoding) = &options.encoding {
                if !encoding.eq_ignore_ascii_case("utf-8") {
                    warn!(filename, encoding = %encoding, "non-utf-8 source read lossily");
                }
            }
            files.push(BibFile {
                path,
                filename,
                options,
            });
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        for name in config.sources.keys() {
            if !files.iter().any(|f| &f.filename == name) {
                warn!(name = %name, "configured source file not found in directory");
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            strict: config.strict,
            files,
        })
    }

    pub fn files(&self) -> &[BibFile] {
        &self.files
    }

    pub fn get(&self, filename: &str) -> Option<&BibFile> {
        self.files.iter().find(|f| f.filename == filename)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Error {
    pub(crate) fn parse(filename: &str, message: impl Into<String>) -> Self {
        Error::Parse {
            filename: filename.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_filenames() {
        assert!(is_excluded("hhold.bib"));
        assert!(is_excluded("hholdv2.bib"));
        assert!(!is_excluded("hh.bib"));
        assert!(!is_excluded("old.bib"), "bare old.bib is a real source");
    }

    #[test]
    fn test_collection_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bib"), "@book{x, title = {T}}\n").unwrap();
        fs::write(dir.path().join("aold.bib"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let config_path = dir.path().join("bibfiles.toml");
        fs::write(
            &config_path,
            r#"
[sources."a.bib"]
priority = 10
sortkey = "bibkey"

[sources."a.bib".field_priority]
lgcode = 20
"#,
        )
        .unwrap();

        let collection = Collection::from_dir(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(collection.files().len(), 1);
        let file = collection.get("a.bib").unwrap();
        assert_eq!(file.options.priority, 10);
        assert_eq!(file.sortkey(), SortKey::Bibkey);
        assert_eq!(file.options.field_priority.get("lgcode"), Some(&20));
    }

    #[test]
    fn test_save_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bib");
        fs::write(&path, "@book{x, title = {Old}}\n").unwrap();
        let file = BibFile {
            path: path.clone(),
            filename: "a.bib".to_string(),
            options: SourceOptions::default(),
        };
        let mut entry = BibEntry::new("x", "book");
        entry.add_field("title", "New");
        file.save(&[entry]).unwrap();

        assert!(fs::read_to_string(&path).unwrap().contains("New"));
        let backup = fs::read_to_string(dir.path().join("a.bib.bak")).unwrap();
        assert!(backup.contains("Old"));
    }
}
