//! Independent audit of a materialized tree.
//!
//! Walks `<root>/<split>/<sample_id>/` and checks each sample directory for one
//! file per expected artifact, matched by file stem. Hidden entries (including
//! `.partial` leftovers) are ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Serialize;

use super::{MaterializeReport, SampleOutcome};
use crate::error::{IoContext, Result};
use crate::split::Split;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteTriplet {
    pub sample_id: String,
    pub split: Split,
    pub missing: Vec<String>,
    /// e.g. `missing artifact: post`
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    pub expected_artifacts: Vec<String>,
    pub total: usize,
    pub complete: usize,
    /// Sorted by sample id.
    pub incomplete: Vec<IncompleteTriplet>,
    /// Complete samples per split.
    pub split_counts: BTreeMap<Split, usize>,
    /// Complete sample directories seen by the walk, keyed by (id, split).
    #[serde(skip)]
    found_complete: BTreeSet<(String, Split)>,
}

impl CompletenessReport {
    /// Report with nothing counted yet.
    pub fn empty(expected_artifacts: Vec<String>) -> Self {
        Self {
            expected_artifacts,
            total: 0,
            complete: 0,
            incomplete: Vec::new(),
            split_counts: Split::ALL.iter().map(|&s| (s, 0)).collect(),
            found_complete: BTreeSet::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }

    pub fn incomplete_count(&self) -> usize {
        self.incomplete.len()
    }

    fn record_complete(&mut self, sample_id: String, split: Split) {
        self.total += 1;
        self.complete += 1;
        *self.split_counts.entry(split).or_default() += 1;
        self.found_complete.insert((sample_id, split));
    }

    /// Reconcile the walk with this run's outcomes, so every sample is counted
    /// once and only samples completed by this run count as complete.
    ///
    /// For each sample in `report`, walk entries in any other split (and, if
    /// the sample did not complete, in its own split too) are dropped. A sample
    /// that did not complete is then recorded as incomplete with its reason.
    /// Directories of samples the run never saw are left as the walk found them.
    pub fn merge_outcomes(&mut self, report: &MaterializeReport) {
        for outcome in &report.outcomes {
            let id = outcome.sample_id();
            let kept_split = match outcome {
                SampleOutcome::Complete { split, .. } => Some(*split),
                _ => None,
            };

            let stale: Vec<(String, Split)> = self
                .found_complete
                .range((id.to_owned(), Split::Train)..=(id.to_owned(), Split::Test))
                .filter(|(_, s)| Some(*s) != kept_split)
                .cloned()
                .collect();
            for key in stale {
                self.found_complete.remove(&key);
                self.total -= 1;
                self.complete -= 1;
                if let Some(n) = self.split_counts.get_mut(&key.1) {
                    *n = n.saturating_sub(1);
                }
            }

            let before = self.incomplete.len();
            self.incomplete.retain(|t| {
                t.sample_id != id || (kept_split.is_some() && Some(t.split) == kept_split)
            });
            self.total -= before - self.incomplete.len();

            let (split, missing) = match outcome {
                SampleOutcome::Complete { .. } => continue,
                SampleOutcome::Incomplete { split, missing, .. } => (*split, missing.clone()),
                SampleOutcome::Failed { split, .. } | SampleOutcome::Cancelled { split, .. } => {
                    (*split, self.expected_artifacts.clone())
                }
            };
            self.incomplete.push(IncompleteTriplet {
                sample_id: id.to_owned(),
                split,
                missing,
                reason: outcome.reason().unwrap_or_default(),
            });
            self.total += 1;
        }
        self.incomplete.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
    }
}

pub fn missing_reason(missing: &[String]) -> String {
    format!("missing artifact: {}", missing.join(", "))
}

/// Walk `root` and report which sample directories hold every artifact in
/// `artifacts`. A missing split directory counts as empty.
pub fn validate_triplets(root: &Path, artifacts: &[String]) -> Result<CompletenessReport> {
    let mut report = CompletenessReport::empty(artifacts.to_vec());

    for split in Split::ALL {
        let split_dir = root.join(split.as_str());
        if !split_dir.is_dir() {
            continue;
        }
        for sample_dir in visible_entries(&split_dir)? {
            if !sample_dir.is_dir() {
                continue;
            }
            let sample_id = sample_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stems: BTreeSet<String> = visible_entries(&sample_dir)?
                .iter()
                .filter(|p| p.is_file())
                .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .collect();
            let missing: Vec<String> =
                artifacts.iter().filter(|a| !stems.contains(*a)).cloned().collect();

            if missing.is_empty() {
                report.record_complete(sample_id, split);
            } else {
                report.total += 1;
                report.incomplete.push(IncompleteTriplet {
                    sample_id,
                    split,
                    reason: missing_reason(&missing),
                    missing,
                });
            }
        }
    }

    report.incomplete.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
    Ok(report)
}

/// Non-hidden entries of `dir`, sorted by name.
fn visible_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).io_context(|| format!("reading {}", dir.display()))? {
        let entry = entry.io_context(|| format!("reading {}", dir.display()))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        out.push(entry.path());
    }
    out.sort();
    Ok(out)
}
