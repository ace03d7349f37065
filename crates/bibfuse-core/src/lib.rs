//! bibfuse-core: entry resolution and identity assignment for merged
//! bibliographies
//!
//! Deduplicates bibliographic records harvested from many independently
//! maintained BibTeX files into one canonical, stably identified
//! bibliography:
//!
//! - content-derived fingerprints cluster likely duplicates
//! - clusters merge under a deterministic field-priority policy
//! - persistent identifiers survive re-runs through split/merge
//!   reconciliation against the previous run's snapshot
//! - accepted values trickle back into the originating source files

pub mod annotate;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod merge;
pub mod pipeline;
pub mod prior;
pub mod store;
pub mod text;
pub mod trickle;

pub use config::{BibFile, Collection, SourceOptions};
pub use error::{Error, Result};
pub use fingerprint::{keyid, WordFrequencies};
pub use identity::{
    resolve, weighted_field_distance, Resolution, ResolutionCounts, ScoreFn, SplitTie,
    NEW_ID_THRESHOLD,
};
pub use merge::{merge_cluster, LogicalEntry, UNION_FIELDS};
pub use pipeline::{run, RunOptions, RunReport};
pub use prior::{EmptyPrior, PriorState, Snapshot};
pub use store::{EntryRow, FieldGroup, RecordStore, SourcedValue, StoreStats};
pub use trickle::{trickle_back, TrickleReport, DEFAULT_TRICKLE_FIELDS};
