//! Batch runner: merge a directory of .bib files into one bibliography.
//!
//! Usage: bibfuse <sources-dir> [output.bib]
//!
//! Optional collaborators are picked up from the sources directory when
//! present: `bibfiles.toml` (per-source options), `monster.csv` (prior-run
//! snapshot, rewritten after the run), `triggers.toml` (annotation rules),
//! `lginfo.csv` (macro-area table).

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use bibfuse_core::{run, RunOptions};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(sources_dir) = args.next().map(PathBuf::from) else {
        eprintln!("usage: bibfuse <sources-dir> [output.bib]");
        return ExitCode::FAILURE;
    };
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| sources_dir.join("monster-utf8.bib"));

    let existing = |name: &str| {
        let path = sources_dir.join(name);
        path.exists().then_some(path)
    };
    let snapshot = sources_dir.join("monster.csv");
    let config = existing("bibfiles.toml");
    let trigger_rules = existing("triggers.toml");
    let language_info = existing("lginfo.csv");
    let authoritative_source = existing("hh.bib").map(|_| "hh.bib".to_string());
    let options = RunOptions {
        config,
        prior_snapshot: Some(snapshot.clone()),
        snapshot_out: Some(snapshot),
        output: Some(output),
        trigger_rules,
        language_info,
        authoritative_source,
        trickle: true,
        db: None,
        sources_dir,
    };

    match run(&options) {
        Ok(report) => {
            println!(
                "{} entries, {} merged, {} new ids, {} trickle warnings",
                report.stats.entries_total,
                report.merged_entries,
                report.counts.new,
                report.trickle.warnings.len()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("bibfuse: {err}");
            ExitCode::FAILURE
        }
    }
}
