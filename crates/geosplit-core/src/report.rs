//! Run report and the text/JSON files written next to the manifest.
//!
//! Nothing here carries a timestamp or per-run counters, so an unchanged rerun
//! leaves every report byte-identical.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::grid::GridStatistics;
use crate::manifest::write_atomic;
use crate::organizer::{CompletenessReport, MaterializeReport, SampleOutcome};
use crate::split::{Split, SplitStatistics, SplitValidationReport};

pub const SPLIT_REPORT_FILE: &str = "split_report.txt";
pub const INTEGRITY_FILE: &str = "integrity_check.json";
pub const SUMMARY_FILE: &str = "summary.txt";
pub const RUN_REPORT_FILE: &str = "run_report.json";

/// How many incomplete triplets `summary.txt` lists before eliding.
const SUMMARY_INCOMPLETE_LIMIT: usize = 10;

/// A sample refused at ingest; it never entered the tile grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedSample {
    pub sample_id: String,
    pub reason: String,
}

/// A sample that was assigned a split but is not in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedSample {
    pub sample_id: String,
    pub split: Split,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaterializationSummary {
    pub complete: usize,
    pub incomplete: Vec<ExcludedSample>,
    pub failed: Vec<ExcludedSample>,
    pub cancelled: Vec<ExcludedSample>,
    /// Files written by this run. Not serialized: it is 0 on a rerun.
    #[serde(skip)]
    pub files_written: usize,
}

impl MaterializationSummary {
    pub fn from_report(report: &MaterializeReport) -> Self {
        let mut out = Self {
            complete: report.count_complete(),
            files_written: report.files_written(),
            ..Self::default()
        };
        for outcome in report.not_complete() {
            let (bucket, split) = match outcome {
                SampleOutcome::Incomplete { split, .. } => (&mut out.incomplete, *split),
                SampleOutcome::Failed { split, .. } => (&mut out.failed, *split),
                SampleOutcome::Cancelled { split, .. } => (&mut out.cancelled, *split),
                SampleOutcome::Complete { .. } => continue,
            };
            bucket.push(ExcludedSample {
                sample_id: outcome.sample_id().to_owned(),
                split,
                reason: outcome.reason().unwrap_or_default(),
            });
        }
        out
    }

    pub fn excluded_count(&self) -> usize {
        self.incomplete.len() + self.failed.len() + self.cancelled.len()
    }
}

/// Everything a run produced besides the tree itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Samples handed to the pipeline, including rejected ones.
    pub total_input: usize,
    pub rejected: Vec<RejectedSample>,
    pub tiles: GridStatistics,
    pub splits: SplitStatistics,
    pub validation: SplitValidationReport,
    pub materialization: MaterializationSummary,
    pub completeness: CompletenessReport,
    pub manifest_rows: usize,
    /// Manifest file names relative to the output root.
    pub manifest_files: Vec<PathBuf>,
    /// Manifest rows per year; `unknown` when a sample has no year.
    pub year_distribution: BTreeMap<String, usize>,
}

impl RunReport {
    /// No rejected, excluded or incomplete samples. Split deviations are
    /// advisory and do not count.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
            && self.materialization.excluded_count() == 0
            && self.completeness.is_complete()
    }

    /// Write every report file into `root` and return their paths.
    pub fn write_all(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let files: [(&str, Vec<u8>); 4] = [
            (SPLIT_REPORT_FILE, SplitReport(self).to_string().into_bytes()),
            (INTEGRITY_FILE, to_json_bytes(&self.completeness, "integrity check")?),
            (SUMMARY_FILE, Summary(self).to_string().into_bytes()),
            (RUN_REPORT_FILE, to_json_bytes(self, "run report")?),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            let path = root.join(name);
            write_atomic(&path, &bytes)?;
            written.push(path);
        }
        Ok(written)
    }
}

fn to_json_bytes<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| Error::Json {
        context: format!("serializing {what}"),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

// ── Text renderings ───────────────────────────────────────────────────────────

/// `split_report.txt`: per-split counts against targets.
pub struct SplitReport<'a>(pub &'a RunReport);

impl fmt::Display for SplitReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.0.validation;
        let rule = "=".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(f, "DATASET SPLIT REPORT")?;
        writeln!(f, "{rule}")?;
        writeln!(f)?;
        writeln!(f, "Total Samples: {}", v.total_samples)?;
        writeln!(f, "Total Tiles:   {}", self.0.splits.total_tiles)?;
        writeln!(f, "Tolerance:     {:.1}%", v.tolerance_pct)?;
        writeln!(f)?;
        writeln!(f, "SPLIT DISTRIBUTION")?;
        writeln!(f, "{}", "-".repeat(60))?;
        for c in &v.checks {
            let tiles = self.0.splits.tally(c.split).tiles;
            writeln!(
                f,
                "{:<6} : {:5} samples {:4} tiles ({:5.1}% actual, {:5.1}% target, {:4.1} off) {}",
                c.split.as_str().to_uppercase(),
                c.samples,
                tiles,
                c.actual_pct,
                c.target_pct,
                c.deviation_pct,
                if c.passed { "PASS" } else { "WARN" },
            )?;
        }
        writeln!(f)?;
        if v.empty {
            writeln!(f, "No samples: every split is empty.")?;
        } else if v.passed {
            writeln!(f, "All splits within tolerance.")?;
        } else {
            writeln!(f, "WARNING: split composition deviates from targets: {}", v.describe())?;
        }
        writeln!(f, "{rule}")
    }
}

/// `summary.txt`: overall status and everything that went wrong.
pub struct Summary<'a>(pub &'a RunReport);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;
        let rule = "=".repeat(70);
        let thin = "-".repeat(70);
        let status = if r.is_clean() { "PASSED" } else { "INCOMPLETE" };

        writeln!(f, "{rule}")?;
        writeln!(f, "DATASET ORGANIZATION SUMMARY")?;
        writeln!(f, "{rule}")?;
        writeln!(f)?;
        writeln!(f, "Validation Status: {status}")?;
        writeln!(
            f,
            "Split Composition: {}",
            if r.validation.passed { "within tolerance" } else { "outside tolerance" }
        )?;
        writeln!(f)?;

        writeln!(f, "STATISTICS")?;
        writeln!(f, "{thin}")?;
        writeln!(f, "Input Samples:       {}", r.total_input)?;
        writeln!(f, "Rejected at Ingest:  {}", r.rejected.len())?;
        writeln!(f, "Tiles:               {}", r.tiles.total_tiles)?;
        writeln!(f, "Manifest Rows:       {}", r.manifest_rows)?;
        writeln!(f, "Complete Triplets:   {}", r.completeness.complete)?;
        writeln!(f, "Incomplete Triplets: {}", r.completeness.incomplete_count())?;
        writeln!(f)?;

        writeln!(f, "SPLIT DISTRIBUTION")?;
        writeln!(f, "{thin}")?;
        let total = r.manifest_rows.max(1) as f64;
        for split in Split::ALL {
            let n = r.completeness.split_counts.get(&split).copied().unwrap_or(0);
            writeln!(
                f,
                "  {:<6} : {:5} samples ({:5.1}%)",
                split.as_str().to_uppercase(),
                n,
                n as f64 / total * 100.0
            )?;
        }
        writeln!(f)?;

        if !r.year_distribution.is_empty() {
            writeln!(f, "YEAR DISTRIBUTION")?;
            writeln!(f, "{thin}")?;
            for (year, n) in &r.year_distribution {
                writeln!(f, "  {year}: {n} samples")?;
            }
            writeln!(f)?;
        }

        let incomplete = &r.completeness.incomplete;
        if !incomplete.is_empty() {
            writeln!(f, "INCOMPLETE TRIPLETS")?;
            writeln!(f, "{thin}")?;
            for t in incomplete.iter().take(SUMMARY_INCOMPLETE_LIMIT) {
                writeln!(f, "  {} ({}): {}", t.sample_id, t.split, t.reason)?;
            }
            if incomplete.len() > SUMMARY_INCOMPLETE_LIMIT {
                writeln!(f, "  ... and {} more", incomplete.len() - SUMMARY_INCOMPLETE_LIMIT)?;
            }
            writeln!(f)?;
        }

        if !r.materialization.failed.is_empty() {
            writeln!(f, "FAILED SAMPLES")?;
            writeln!(f, "{thin}")?;
            for e in &r.materialization.failed {
                writeln!(f, "  {} ({}): {}", e.sample_id, e.split, e.reason)?;
            }
            writeln!(f)?;
        }

        if !r.rejected.is_empty() {
            writeln!(f, "REJECTED SAMPLES")?;
            writeln!(f, "{thin}")?;
            for s in &r.rejected {
                writeln!(f, "  {}: {}", s.sample_id, s.reason)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "{rule}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplitConfig;
    use crate::split::{SplitTally, SplitValidator};
    use std::fs;
    use tempfile::TempDir;

    fn report(incomplete_ids: &[&str]) -> RunReport {
        let splits = SplitStatistics {
            total_tiles: 3,
            total_samples: 10,
            splits: [
                (Split::Train, SplitTally { tiles: 1, samples: 5, percentage: 50.0 }),
                (Split::Val, SplitTally { tiles: 1, samples: 3, percentage: 30.0 }),
                (Split::Test, SplitTally { tiles: 1, samples: 2, percentage: 20.0 }),
            ]
            .into_iter()
            .collect(),
        };
        let validation =
            SplitValidator::new(5.0).unwrap().validate(&splits, &SplitConfig::default());
        let outcomes = MaterializeReport {
            outcomes: incomplete_ids
                .iter()
                .map(|id| SampleOutcome::Incomplete {
                    sample_id: id.to_string(),
                    split: Split::Train,
                    missing: vec!["post".into()],
                })
                .collect(),
        };
        let mut completeness =
            CompletenessReport::empty(vec!["pre".into(), "post".into(), "label".into()]);
        completeness.total = 10 - incomplete_ids.len();
        completeness.complete = completeness.total;
        completeness.split_counts = [
            (Split::Train, 5 - incomplete_ids.len()),
            (Split::Val, 3),
            (Split::Test, 2),
        ]
        .into_iter()
        .collect();
        completeness.merge_outcomes(&outcomes);
        RunReport {
            total_input: 10,
            rejected: vec![],
            tiles: GridStatistics {
                total_tiles: 3,
                total_samples: 10,
                samples_per_tile_min: 2,
                samples_per_tile_max: 5,
                samples_per_tile_mean: 10.0 / 3.0,
            },
            splits,
            validation,
            materialization: MaterializationSummary::from_report(&outcomes),
            completeness,
            manifest_rows: 10 - incomplete_ids.len(),
            manifest_files: vec![PathBuf::from("metadata.csv")],
            year_distribution: [("2019".to_string(), 4), ("unknown".to_string(), 6)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn split_report_flags_deviation() {
        let text = SplitReport(&report(&[])).to_string();
        assert!(text.contains("DATASET SPLIT REPORT"));
        assert!(text.contains("TRAIN  :     5 samples"));
        assert!(text.contains("WARN"));
        assert!(text.contains("WARNING: split composition deviates"));
    }

    #[test]
    fn summary_lists_incomplete_and_truncates() {
        let ids: Vec<String> = (0..12).map(|i| format!("s{i:02}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut r = report(&refs[..4]);
        let text = Summary(&r).to_string();
        assert!(text.contains("Validation Status: INCOMPLETE"));
        assert!(text.contains("  s00 (train): missing artifact: post"));
        assert!(text.contains("  2019: 4 samples"));
        assert!(!text.contains("... and"));

        for id in &refs[4..] {
            r.completeness.incomplete.push(crate::organizer::IncompleteTriplet {
                sample_id: id.to_string(),
                split: Split::Val,
                missing: vec!["label".into()],
                reason: "missing artifact: label".into(),
            });
        }
        let text = Summary(&r).to_string();
        assert!(text.contains("... and 2 more"));
        assert!(!text.contains("s10 (val)"));
    }

    #[test]
    fn clean_run_passes() {
        let r = report(&[]);
        assert!(r.is_clean());
        assert!(Summary(&r).to_string().contains("Validation Status: PASSED"));
    }

    #[test]
    fn writes_all_report_files_deterministically() {
        let tmp = TempDir::new().unwrap();
        let mut r = report(&["x"]);
        r.materialization.files_written = 27;
        let paths = r.write_all(tmp.path()).unwrap();
        assert_eq!(paths.len(), 4);
        let first: Vec<Vec<u8>> = paths.iter().map(|p| fs::read(p).unwrap()).collect();

        r.materialization.files_written = 0;
        r.write_all(tmp.path()).unwrap();
        let second: Vec<Vec<u8>> = paths.iter().map(|p| fs::read(p).unwrap()).collect();
        assert_eq!(first, second);

        let integrity: serde_json::Value =
            serde_json::from_slice(&fs::read(tmp.path().join(INTEGRITY_FILE)).unwrap()).unwrap();
        assert_eq!(integrity["incomplete"][0]["sample_id"], "x");
        assert_eq!(integrity["split_counts"]["train"], 4);
        let run: serde_json::Value =
            serde_json::from_slice(&fs::read(tmp.path().join(RUN_REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(run["materialization"]["incomplete"][0]["reason"], "missing artifact: post");
        assert!(run["materialization"].get("files_written").is_none());
    }
}
