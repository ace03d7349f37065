//! The batch pipeline
//!
//! Run-to-completion phases over the whole corpus: import every source file,
//! build the title-word frequency snapshot, fingerprint, resolve persistent
//! identifiers against the previous run, merge clusters, annotate, write the
//! merged output and the next-run snapshot, trickle identifiers back.
//! Phase ordering is fixed; per-phase counters go to the log as regression
//! signals.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use bibfuse_bibtex::{entry_from_fields, format_entries, BibEntry, SortKey};

use crate::annotate::{
    annotate_with_triggers, inject_macro_area, language_status, load_language_info,
    revert_inferred_upgrades, TriggerRules,
};
use crate::config::Collection;
use crate::error::{Error, Result};
use crate::identity::{resolve, weighted_field_distance, ResolutionCounts};
use crate::merge::{merge_cluster, LogicalEntry, UNION_FIELDS};
use crate::prior::{EmptyPrior, PriorState, Snapshot};
use crate::store::{RecordStore, StoreStats};
use crate::text::author::standardize_contributors;
use crate::trickle::{trickle_back, TrickleReport, DEFAULT_TRICKLE_FIELDS};

const CLUSTER_WINDOW: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Directory of source .bib files
    pub sources_dir: PathBuf,
    /// bibfiles.toml with per-source options
    pub config: Option<PathBuf>,
    /// Record store location; in-memory when absent
    pub db: Option<PathBuf>,
    /// Previous run's snapshot (read)
    pub prior_snapshot: Option<PathBuf>,
    /// Next run's snapshot (written)
    pub snapshot_out: Option<PathBuf>,
    /// Merged bibliography output file
    pub output: Option<PathBuf>,
    /// Trigger rule file for annotation
    pub trigger_rules: Option<PathBuf>,
    /// Language-code -> macro-area table
    pub language_info: Option<PathBuf>,
    /// Source file whose records supply the authoritative descriptive
    /// status per language
    pub authoritative_source: Option<String>,
    /// Write identifiers back into the source files
    pub trickle: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stats: StoreStats,
    pub counts: ResolutionCounts,
    pub merged_entries: usize,
    pub parse_errors: usize,
    pub trickle: TrickleReport,
}

pub fn run(options: &RunOptions) -> Result<RunReport> {
    let collection = Collection::from_dir(&options.sources_dir, options.config.as_deref())?;
    if collection.is_empty() {
        return Err(Error::Config(format!(
            "no source files in {}",
            options.sources_dir.display()
        )));
    }

    let mut store = match &options.db {
        Some(path) => {
            if path.exists() {
                fs::remove_file(path)?;
            }
            RecordStore::open(path)?
        }
        None => RecordStore::open_in_memory()?,
    };

    // Import
    let mut parse_errors = 0usize;
    for file in collection.files() {
        let parsed = file.load()?;
        if !parsed.errors.is_empty() {
            let strict = collection.strict || file.options.use_external_parser;
            if strict {
                return Err(Error::parse(&file.filename, parsed.errors[0].to_string()));
            }
            for error in &parsed.errors {
                warn!(filename = %file.filename, %error, "skipping malformed record");
            }
            parse_errors += parsed.errors.len();
        }
        store.import_file(
            &file.filename,
            file.options.priority,
            &file.options.field_priority,
            &parsed.entries,
        )?;
    }

    // Fingerprint (two passes)
    let freq = store.build_word_frequencies()?;
    let hashed = store.generate_hashes(&freq)?;
    info!(hashed, "fingerprints generated");
    let stats = store.stats()?;

    // Resolve identities against the prior snapshot
    let prior: Box<dyn PriorState> = match &options.prior_snapshot {
        Some(path) if path.exists() => Box::new(Snapshot::from_csv(path)?),
        _ => Box::new(EmptyPrior),
    };
    let rows = store.entry_rows()?;
    let resolution = {
        let fetch = |hash: &str| match store.cluster_by_hash(hash) {
            Ok(groups) => merge_cluster(&groups, &UNION_FIELDS).fields,
            Err(_) => Default::default(),
        };
        resolve(&rows, &fetch, prior.as_ref(), weighted_field_distance)?
    };
    store.apply_ids(&resolution.by_hash)?;
    store.assert_bijection()?;

    // Merge, windowed by identifier
    let mut entries: BTreeMap<i64, LogicalEntry> = BTreeMap::new();
    let mut hashes: BTreeMap<i64, String> = BTreeMap::new();
    for (first, last) in store.id_windows(CLUSTER_WINDOW)? {
        for (id, hash, groups) in store.clusters_between(first, last)? {
            let mut entry = merge_cluster(&groups, &UNION_FIELDS);
            entry
                .fields
                .insert("glottolog_ref_id".to_string(), id.to_string());
            entries.insert(id, entry);
            hashes.insert(id, hash);
        }
    }
    info!(count = entries.len(), "merged logical entries");

    // Annotate
    if let Some(path) = &options.language_info {
        let table = load_language_info(path)?;
        inject_macro_area(&mut entries, &table);
    }
    if let Some(path) = &options.trigger_rules {
        let rules = TriggerRules::from_toml_file(path)?;
        let assigned = annotate_with_triggers(&mut entries, &rules);
        if let Some(source) = &options.authoritative_source {
            if let Some(file) = collection.get(source) {
                let parsed = file.load()?;
                let pairs: Vec<(String, String)> = parsed
                    .entries
                    .iter()
                    .filter_map(|e| {
                        Some((
                            e.get_field("lgcode")?.to_string(),
                            e.get_field("hhtype").unwrap_or("unknown").to_string(),
                        ))
                    })
                    .collect();
                let authoritative =
                    language_status(pairs.iter().map(|(l, h)| (l.as_str(), h.as_str())));
                revert_inferred_upgrades(&mut entries, &assigned, &authoritative);
            } else {
                warn!(source = %source, "authoritative source not in collection");
            }
        }
    }

    // Write the merged bibliography, contributor strings normalized to
    // "Last, First and ..."
    if let Some(path) = &options.output {
        let mut output: Vec<BibEntry> = Vec::with_capacity(entries.len());
        for (id, entry) in &entries {
            let mut fields = entry.fields.clone();
            for contributor_field in ["author", "editor"] {
                if let Some(value) = fields.get(contributor_field).cloned() {
                    fields.insert(
                        contributor_field.to_string(),
                        standardize_contributors(&value),
                    );
                }
            }
            fields.insert("src".to_string(), entry.src_field());
            fields.insert("srctrickle".to_string(), entry.srctrickle_field());
            output.push(entry_from_fields(
                id.to_string(),
                entry.entry_type.clone(),
                &fields,
            ));
        }
        fs::write(path, format_entries(&output, SortKey::Bibkey))?;
        info!(path = %path.display(), count = output.len(), "wrote merged bibliography");
    }

    // Snapshot for the next run
    if let Some(path) = &options.snapshot_out {
        Snapshot::write_csv(
            path,
            entries
                .iter()
                .filter_map(|(id, entry)| Some((hashes.get(id)?.as_str(), *id, entry))),
        )?;
        info!(path = %path.display(), "wrote identifier snapshot");
    }

    // Trickle identifiers back into the sources
    let trickle = if options.trickle {
        trickle_back(&collection, &entries, &DEFAULT_TRICKLE_FIELDS)?
    } else {
        TrickleReport::default()
    };

    Ok(RunReport {
        stats,
        counts: resolution.counts,
        merged_entries: entries.len(),
        parse_errors,
        trickle,
    })
}
