//! Persistent identifier resolution
//!
//! Reconciles freshly computed fingerprint clusters against the identifiers
//! inherited from previous runs. Four states per cluster:
//!
//! - unchanged: one inherited identifier, claimed by no other cluster
//! - merged: several previously distinct identifiers now share one
//!   fingerprint; the maximum survives
//! - split: one identifier's records now spread over several fingerprints;
//!   the cluster textually closest to the previous run's merged entry keeps
//!   it, the rest start over as new
//! - new: no identifier; the next counter value above the reserved range
//!
//! Postcondition (hard): the fingerprint<->identifier mapping is a
//! bijection. Once an identifier has been trickled into source files it is
//! never reused for a different publication; violations surface as errors,
//! not silent fixes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use strsim::normalized_levenshtein;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::prior::PriorState;
use crate::store::EntryRow;

/// Identifiers at or below this value belong to pre-system legacy
/// assignments; freshly allocated ones start above it.
pub const NEW_ID_THRESHOLD: i64 = 300_000;

/// Distance between two field maps in [0, 1]; lower is more similar.
/// Kept as a named function type so the weighting policy stays swappable.
pub type ScoreFn = fn(&HashMap<String, String>, &HashMap<String, String>) -> f64;

/// Default split-resolution distance: weighted mean string similarity over
/// the shared fields, author/year/title triple-weighted.
pub fn weighted_field_distance(
    left: &HashMap<String, String>,
    right: &HashMap<String, String>,
) -> f64 {
    let mut ratio_sum = 0.0;
    let mut weight_sum = 0.0;
    for (key, lvalue) in left {
        let Some(rvalue) = right.get(key) else {
            continue;
        };
        let weight = match key.as_str() {
            "author" | "year" | "title" => 3.0,
            _ => 1.0,
        };
        ratio_sum += weight * normalized_levenshtein(lvalue, rvalue);
        weight_sum += weight;
    }
    if weight_sum == 0.0 {
        return 1.0;
    }
    1.0 - ratio_sum / weight_sum
}

/// An unresolvable split tie, reported for manual review
#[derive(Debug, Clone)]
pub struct SplitTie {
    pub refid: i64,
    pub candidates: Vec<(String, f64)>,
    pub chosen: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionCounts {
    pub unchanged: usize,
    pub merged: usize,
    pub split: usize,
    pub recovered: usize,
    pub new: usize,
}

/// Outcome of identifier resolution
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Final fingerprint -> identifier mapping (a bijection)
    pub by_hash: BTreeMap<String, i64>,
    pub counts: ResolutionCounts,
    pub ties: Vec<SplitTie>,
}

/// Resolve identifiers for the current clusters.
///
/// `merged_fields` supplies the merged field map of a fingerprint cluster
/// (used only for split-resolution distances); `prior` is the previous
/// run's snapshot. Pure apart from logging: same inputs, same output.
pub fn resolve(
    rows: &[EntryRow],
    merged_fields: &dyn Fn(&str) -> HashMap<String, String>,
    prior: &dyn PriorState,
    score: ScoreFn,
) -> Result<Resolution> {
    let mut hash_refids: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
    let mut refid_hashes: BTreeMap<i64, BTreeSet<&str>> = BTreeMap::new();
    for row in rows {
        if row.hash.is_empty() {
            return Err(Error::Store(format!(
                "record {}#{} has no fingerprint",
                row.filename, row.bibkey
            )));
        }
        let refids = hash_refids.entry(&row.hash).or_default();
        if let Some(refid) = row.refid {
            refids.insert(refid);
            refid_hashes.entry(refid).or_default().insert(&row.hash);
        }
    }

    let mut counts = ResolutionCounts::default();
    let mut ties = Vec::new();

    // Split resolution: every inherited identifier ends up claimed by
    // exactly one cluster.
    let mut keeper: BTreeMap<i64, &str> = BTreeMap::new();
    for (&refid, hashes) in &refid_hashes {
        if hashes.len() == 1 {
            if let Some(&hash) = hashes.iter().next() {
                keeper.insert(refid, hash);
            }
            continue;
        }
        counts.split += 1;
        let chosen = match prior.prior_entry_fields(refid) {
            Some(old) => {
                let scored: Vec<(&str, f64)> = hashes
                    .iter()
                    .map(|&h| (h, score(old, &merged_fields(h))))
                    .collect();
                let best = scored
                    .iter()
                    .map(|(_, d)| *d)
                    .fold(f64::INFINITY, f64::min);
                let tied: Vec<&str> = scored
                    .iter()
                    .filter(|(_, d)| *d == best)
                    .map(|(h, _)| *h)
                    .collect();
                if tied.len() > 1 {
                    warn!(
                        refid,
                        candidates = ?scored,
                        "ambiguous split tie, keeping lexicographically smallest"
                    );
                    ties.push(SplitTie {
                        refid,
                        candidates: scored
                            .iter()
                            .map(|(h, d)| (h.to_string(), *d))
                            .collect(),
                        chosen: tied[0].to_string(),
                    });
                }
                tied[0]
            }
            None => {
                // No prior merged entry to compare against; sorted order
                // keeps the outcome deterministic
                warn!(refid, "split without prior snapshot entry");
                match hashes.iter().next() {
                    Some(&h) => h,
                    None => continue,
                }
            }
        };
        keeper.insert(refid, chosen);
    }

    // Per-cluster assignment from the surviving claims
    let mut by_hash: BTreeMap<String, i64> = BTreeMap::new();
    let mut used: BTreeSet<i64> = BTreeSet::new();
    let mut unassigned: Vec<&str> = Vec::new();
    for (&hash, refids) in &hash_refids {
        let kept: Vec<i64> = refids
            .iter()
            .copied()
            .filter(|r| keeper.get(r) == Some(&hash))
            .collect();
        let id = match kept.len() {
            0 => {
                unassigned.push(hash);
                continue;
            }
            1 => {
                counts.unchanged += 1;
                kept[0]
            }
            _ => {
                counts.merged += 1;
                kept[kept.len() - 1]
            }
        };
        if !used.insert(id) {
            return Err(Error::IdentityBijection(format!(
                "identifier {id} claimed by two fingerprints"
            )));
        }
        by_hash.insert(hash.to_string(), id);
    }

    // Clusters without a surviving claim: recover the previous run's
    // identifier for an unchanged fingerprint, else allocate
    let mut next_id = used
        .iter()
        .next_back()
        .copied()
        .max(Some(NEW_ID_THRESHOLD))
        .unwrap_or(NEW_ID_THRESHOLD);
    let mut fresh: Vec<&str> = Vec::new();
    for hash in unassigned {
        match prior.identifier_by_fingerprint(hash) {
            Some(id) if !used.contains(&id) && !refid_hashes.contains_key(&id) => {
                counts.recovered += 1;
                used.insert(id);
                next_id = next_id.max(id);
                by_hash.insert(hash.to_string(), id);
            }
            _ => fresh.push(hash),
        }
    }
    for hash in fresh {
        counts.new += 1;
        next_id += 1;
        used.insert(next_id);
        by_hash.insert(hash.to_string(), next_id);
    }

    if by_hash.len() != used.len() {
        return Err(Error::IdentityBijection(format!(
            "{} fingerprints mapped to {} identifiers",
            by_hash.len(),
            used.len()
        )));
    }

    info!(
        unchanged = counts.unchanged,
        merged = counts.merged,
        split = counts.split,
        recovered = counts.recovered,
        new = counts.new,
        "resolved identifiers"
    );
    Ok(Resolution {
        by_hash,
        counts,
        ties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::{EmptyPrior, Snapshot};

    fn row(filename: &str, bibkey: &str, refid: Option<i64>, hash: &str) -> EntryRow {
        EntryRow {
            filename: filename.to_string(),
            bibkey: bibkey.to_string(),
            refid,
            hash: hash.to_string(),
        }
    }

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn no_fields(_hash: &str) -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_new_ids_start_above_threshold() {
        let rows = vec![
            row("a.bib", "a1", None, "hash-a"),
            row("b.bib", "b1", None, "hash-b"),
        ];
        let res = resolve(&rows, &no_fields, &EmptyPrior, weighted_field_distance).unwrap();
        assert_eq!(res.by_hash["hash-a"], NEW_ID_THRESHOLD + 1);
        assert_eq!(res.by_hash["hash-b"], NEW_ID_THRESHOLD + 2);
        assert_eq!(res.counts.new, 2);
    }

    #[test]
    fn test_unchanged_keeps_inherited_id() {
        let rows = vec![
            row("a.bib", "a1", Some(500), "hash-a"),
            row("b.bib", "b1", Some(500), "hash-a"),
        ];
        let res = resolve(&rows, &no_fields, &EmptyPrior, weighted_field_distance).unwrap();
        assert_eq!(res.by_hash["hash-a"], 500);
        assert_eq!(res.counts.unchanged, 1);
    }

    #[test]
    fn test_merged_takes_maximum() {
        let rows = vec![
            row("a.bib", "a1", Some(500), "hash-a"),
            row("b.bib", "b1", Some(720), "hash-a"),
        ];
        let res = resolve(&rows, &no_fields, &EmptyPrior, weighted_field_distance).unwrap();
        assert_eq!(res.by_hash["hash-a"], 720);
        assert_eq!(res.counts.merged, 1);
    }

    #[test]
    fn test_split_keeps_id_on_closest_cluster() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "old-hash",
            500,
            &fields(&[
                ("author", "Smith"),
                ("year", "1990"),
                ("title", "Grammar of Foo"),
            ]),
        );

        let rows = vec![
            row("a.bib", "x", Some(500), "hash-x"),
            row("b.bib", "y", Some(500), "hash-y"),
        ];
        let merged = |hash: &str| -> HashMap<String, String> {
            if hash == "hash-x" {
                fields(&[
                    ("author", "Smith"),
                    ("year", "1990"),
                    ("title", "Grammar of Foo"),
                ])
            } else {
                fields(&[
                    ("author", "Jones"),
                    ("year", "1971"),
                    ("title", "Totally Different Work"),
                ])
            }
        };
        let res = resolve(&rows, &merged, &snapshot, weighted_field_distance).unwrap();
        assert_eq!(res.by_hash["hash-x"], 500);
        assert!(res.by_hash["hash-y"] > NEW_ID_THRESHOLD);
        assert_eq!(res.counts.split, 1);
        assert_eq!(res.counts.new, 1);
        assert!(res.ties.is_empty());
    }

    #[test]
    fn test_ambiguous_split_reported_and_deterministic() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("old-hash", 500, &fields(&[("title", "Same")]));

        let rows = vec![
            row("a.bib", "x", Some(500), "hash-b"),
            row("b.bib", "y", Some(500), "hash-a"),
        ];
        let merged = |_hash: &str| fields(&[("title", "Same")]);
        let res = resolve(&rows, &merged, &snapshot, weighted_field_distance).unwrap();
        assert_eq!(res.ties.len(), 1);
        // Lexicographically smallest fingerprint keeps the identifier
        assert_eq!(res.by_hash["hash-a"], 500);
        assert!(res.by_hash["hash-b"] > NEW_ID_THRESHOLD);
        assert_eq!(res.ties[0].chosen, "hash-a");
    }

    #[test]
    fn test_recovered_by_prior_fingerprint() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("hash-a", 600, &fields(&[("title", "T")]));

        let rows = vec![row("a.bib", "a1", None, "hash-a")];
        let res = resolve(&rows, &no_fields, &snapshot, weighted_field_distance).unwrap();
        assert_eq!(res.by_hash["hash-a"], 600);
        assert_eq!(res.counts.recovered, 1);
        assert_eq!(res.counts.new, 0);
    }

    #[test]
    fn test_bijection_over_result() {
        let rows = vec![
            row("a.bib", "a1", Some(500), "hash-a"),
            row("a.bib", "a2", None, "hash-b"),
            row("b.bib", "b1", Some(500), "hash-a"),
        ];
        let res = resolve(&rows, &no_fields, &EmptyPrior, weighted_field_distance).unwrap();
        let ids: BTreeSet<i64> = res.by_hash.values().copied().collect();
        assert_eq!(ids.len(), res.by_hash.len());
    }

    #[test]
    fn test_new_counter_continues_above_existing_ids() {
        let rows = vec![
            row("a.bib", "a1", Some(300_417), "hash-a"),
            row("a.bib", "a2", None, "hash-b"),
        ];
        let res = resolve(&rows, &no_fields, &EmptyPrior, weighted_field_distance).unwrap();
        assert_eq!(res.by_hash["hash-b"], 300_418);
    }

    #[test]
    fn test_weighted_field_distance() {
        let a = fields(&[
            ("author", "Smith"),
            ("year", "1990"),
            ("title", "Grammar of Foo"),
        ]);
        assert!(weighted_field_distance(&a, &a) < 1e-9);

        let b = fields(&[
            ("author", "Jones"),
            ("year", "1971"),
            ("title", "Something Else"),
        ]);
        assert!(weighted_field_distance(&a, &b) > 0.5);

        let disjoint = fields(&[("publisher", "X")]);
        assert_eq!(weighted_field_distance(&a, &disjoint), 1.0);
    }
}
