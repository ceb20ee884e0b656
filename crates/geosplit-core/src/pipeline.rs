/// End-to-end dataset organization: samples in, split tree + manifest + reports out.
///
/// Stages run strictly in order. Configuration is checked in `new`, so a bad
/// config never touches the filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use log::{info, warn};
use serde::Serialize;

use crate::config::DatasetConfig;
use crate::error::{Result, SampleError};
use crate::grid::{GridStatistics, TileGrid};
use crate::manifest::{ManifestRow, ManifestWriter};
use crate::organizer::{CancelToken, SampleJob, TripletOrganizer};
use crate::report::{MaterializationSummary, RejectedSample, RunReport};
use crate::sample::Sample;
use crate::split::{Split, SplitAssigner, SplitStatistics, SplitValidationReport, SplitValidator};

// ── Public structs ────────────────────────────────────────────────────────────

/// Result of a dry run: the split every sample would land in.
#[derive(Debug, Clone, Serialize)]
pub struct SplitPlan {
    pub rejected: Vec<RejectedSample>,
    pub tiles: GridStatistics,
    pub splits: SplitStatistics,
    pub validation: SplitValidationReport,
    /// Sample id → split, sorted by id.
    pub assignments: BTreeMap<String, Split>,
}

/// Samples split into those that may enter the grid and those refused.
struct Ingested<'a> {
    accepted: Vec<&'a Sample>,
    rejected: Vec<RejectedSample>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DatasetPipeline {
    config: DatasetConfig,
    assigner: SplitAssigner,
    validator: SplitValidator,
    cancel: CancelToken,
}

impl DatasetPipeline {
    pub fn new(config: DatasetConfig) -> Result<Self> {
        config.validate()?;
        let validator = SplitValidator::new(config.tolerance_pct)?;
        Ok(Self {
            assigner: SplitAssigner::new(config.split),
            validator,
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Token that stops materialization at the next sample boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Assign splits without touching the filesystem.
    pub fn plan(&self, samples: &[Sample]) -> Result<SplitPlan> {
        let ingested = ingest(samples);
        let grid = self.build_grid(&ingested.accepted)?;
        let generated = self.assigner.generate_splits(&grid);
        let validation = self.validate_splits(&generated.statistics);
        Ok(SplitPlan {
            rejected: ingested.rejected,
            tiles: grid.statistics(),
            assignments: generated.assignment.sample_splits(&grid),
            splits: generated.statistics,
            validation,
        })
    }

    /// Run every stage and write the tree, manifest and reports under the
    /// configured output root.
    pub fn run(&self, samples: &[Sample]) -> Result<RunReport> {
        let root = self.config.output_root.clone();

        // ── 1. Ingest ───────────────────────────────────────────────────────
        let ingested = ingest(samples);

        // ── 2. Tile grid ────────────────────────────────────────────────────
        let grid = self.build_grid(&ingested.accepted)?;

        // ── 3. Split assignment + validation ────────────────────────────────
        let generated = self.assigner.generate_splits(&grid);
        let validation = self.validate_splits(&generated.statistics);

        // ── 4. Materialization ──────────────────────────────────────────────
        let artifacts = self.config.artifacts.clone();
        let organizer = TripletOrganizer::new(&root, artifacts, self.config.placement)
            .with_workers(self.config.workers)
            .with_timeout(self.config.timeout())
            .with_cancel_token(self.cancel.clone());
        let jobs: Vec<SampleJob<'_>> = ingested
            .accepted
            .iter()
            .filter_map(|s| {
                generated
                    .assignment
                    .split_of_sample(&grid, &s.id)
                    .map(|split| SampleJob { sample: s, split })
            })
            .collect();
        let materialized = organizer.materialize(&jobs)?;

        // ── 5. Manifest ─────────────────────────────────────────────────────
        let by_id: BTreeMap<&str, &Sample> =
            ingested.accepted.iter().map(|s| (s.id.as_str(), *s)).collect();
        let rows: Vec<ManifestRow> = materialized
            .complete()
            .filter_map(|o| by_id.get(o.sample_id()).and_then(|s| ManifestRow::from_outcome(s, o)))
            .collect();
        let manifest_paths = ManifestWriter::new(self.config.artifacts.clone()).write_all(
            &rows,
            &root,
            &self.config.manifest_formats,
        )?;

        // ── 6. Completeness ─────────────────────────────────────────────────
        let mut completeness = organizer.validate_triplets()?;
        completeness.merge_outcomes(&materialized);
        if !completeness.is_complete() {
            warn!(
                "{} of {} triplets incomplete",
                completeness.incomplete_count(),
                completeness.total
            );
        }

        // ── 7. Reports ──────────────────────────────────────────────────────
        let report = RunReport {
            total_input: samples.len(),
            rejected: ingested.rejected,
            tiles: grid.statistics(),
            splits: generated.statistics,
            validation,
            materialization: MaterializationSummary::from_report(&materialized),
            completeness,
            manifest_rows: rows.len(),
            manifest_files: manifest_paths
                .iter()
                .filter_map(|p| p.file_name().map(PathBuf::from))
                .collect(),
            year_distribution: year_distribution(&rows),
        };
        report.write_all(&root)?;

        info!(
            "organized {} of {} samples into {} ({} rejected, {} excluded)",
            report.manifest_rows,
            report.total_input,
            root.display(),
            report.rejected.len(),
            report.materialization.excluded_count()
        );
        Ok(report)
    }

    fn build_grid(&self, samples: &[&Sample]) -> Result<TileGrid> {
        let mut grid = TileGrid::new(self.config.split.tile_size_deg())?;
        for s in samples {
            grid.add_sample(s);
        }
        info!(
            "{} samples in {} tiles of {}°",
            grid.sample_count(),
            grid.tile_count(),
            grid.tile_size()
        );
        Ok(grid)
    }

    fn validate_splits(&self, statistics: &SplitStatistics) -> SplitValidationReport {
        let validation = self.validator.validate(statistics, &self.config.split);
        for c in validation.failing() {
            warn!(
                "{} split at {:.1}% vs target {:.1}% (off by {:.1}, tolerance {:.1})",
                c.split, c.actual_pct, c.target_pct, c.deviation_pct, validation.tolerance_pct
            );
        }
        validation
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Refuse samples that cannot be placed: bad id, bad bbox, or an id already
/// seen earlier in the input.
fn ingest(samples: &[Sample]) -> Ingested<'_> {
    let mut seen = BTreeSet::new();
    let mut accepted = Vec::with_capacity(samples.len());
    let mut rejected = Vec::new();
    for s in samples {
        let checked = s.check().and_then(|_| {
            if seen.insert(s.id.as_str()) {
                Ok(())
            } else {
                Err(SampleError::DuplicateId(s.id.clone()))
            }
        });
        match checked {
            Ok(()) => accepted.push(s),
            Err(e) => {
                warn!("rejecting sample: {e}");
                rejected.push(RejectedSample { sample_id: s.id.clone(), reason: e.to_string() });
            }
        }
    }
    Ingested { accepted, rejected }
}

fn year_distribution(rows: &[ManifestRow]) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for r in rows {
        let key = r.year.map_or_else(|| "unknown".to_owned(), |y| y.to_string());
        *out.entry(key).or_default() += 1;
    }
    out
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ManifestFormat, SplitConfig};
    use crate::coords::BBox;
    use crate::error::{ConfigError, Error};
    use crate::organizer::validate_triplets;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Sample centred at (cx, cy) with all three artifacts written under `src`.
    fn sample(src: &Path, id: &str, cx: f64, cy: f64) -> Sample {
        let mut s = Sample::new(id, BBox::new(cx - 0.01, cy - 0.01, cx + 0.01, cy + 0.01))
            .with_label("high_loss")
            .with_year(2020);
        for (name, ext) in [("pre", "png"), ("post", "png"), ("label", "tif")] {
            let p = src.join(format!("{id}_{name}.{ext}"));
            fs::write(&p, format!("{id}/{name}")).unwrap();
            s = s.with_artifact(name, p);
        }
        s
    }

    fn config(root: &Path) -> DatasetConfig {
        DatasetConfig {
            output_root: root.to_path_buf(),
            tolerance_pct: 2.0,
            ..DatasetConfig::default()
        }
    }

    fn setup() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        (tmp, src)
    }

    /// Every file under `root` with its bytes.
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut out = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let p = entry.unwrap().path();
                if p.is_dir() {
                    stack.push(p);
                } else {
                    out.insert(p.strip_prefix(root).unwrap().to_path_buf(), fs::read(&p).unwrap());
                }
            }
        }
        out
    }

    /// 100 samples over the 3×3 block of 1° tiles at the origin.
    fn hundred_over_nine_tiles(src: &Path) -> Vec<Sample> {
        (0..100)
            .map(|i| {
                let tile = i % 9;
                let cx = (tile / 3) as f64 + 0.1 + 0.008 * (i / 9) as f64;
                let cy = (tile % 3) as f64 + 0.5;
                sample(src, &format!("s{i:03}"), cx, cy)
            })
            .collect()
    }

    #[test]
    fn rejects_bad_percentages_before_touching_disk() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        let cfg: std::result::Result<DatasetConfig, _> = serde_json::from_str(
            r#"{"split": {"train_pct": 70, "val_pct": 15, "test_pct": 10}}"#,
        );
        assert!(cfg.is_err());

        let mut bad = config(&root);
        bad.tolerance_pct = -1.0;
        assert!(matches!(
            DatasetPipeline::new(bad),
            Err(Error::Config(ConfigError::InvalidTolerance(_)))
        ));
        assert_eq!(SplitConfig::new(70.0, 15.0, 10.0, 1.0), Err(ConfigError::PercentageSum(95.0)));
        assert!(!root.exists());
    }

    #[test]
    fn nine_tiles_deviation_is_reported_not_masked() {
        let (tmp, src) = setup();
        let root = tmp.path().join("out");
        let samples = hundred_over_nine_tiles(&src);
        let pipeline = DatasetPipeline::new(config(&root)).unwrap();

        let report = pipeline.run(&samples).unwrap();
        assert_eq!(report.tiles.total_tiles, 9);
        // Buckets of tile_0_0 .. tile_2_2 are all below 70.
        assert_eq!(report.splits.tally(Split::Train).samples, 100);
        assert!(!report.validation.passed);
        assert_eq!(report.validation.failing().count(), 3);
        assert_eq!(report.manifest_rows, 100);
        assert!(report.is_clean());

        let again = pipeline.plan(&samples).unwrap();
        assert_eq!(again.splits, report.splits);
        assert!(again.assignments.values().all(|s| *s == Split::Train));

        let split_report = fs::read_to_string(root.join("split_report.txt")).unwrap();
        assert!(split_report.contains("WARN"));
    }

    #[test]
    fn missing_post_excludes_only_that_sample() {
        let (tmp, src) = setup();
        let root = tmp.path().join("out");
        let mut samples: Vec<Sample> = (0..6)
            .map(|i| sample(&src, &format!("s{i}"), -1.5 + i as f64, 0.5))
            .collect();
        fs::remove_file(&samples[2].artifacts["post"]).unwrap();
        samples[2].label = Some("low_loss".into());

        let report = DatasetPipeline::new(config(&root)).unwrap().run(&samples).unwrap();
        assert_eq!(report.manifest_rows, 5);
        assert!(!report.is_clean());
        assert_eq!(report.completeness.complete, 5);
        assert_eq!(report.completeness.incomplete.len(), 1);
        let x = &report.completeness.incomplete[0];
        assert_eq!(x.sample_id, "s2");
        assert_eq!(x.reason, "missing artifact: post");
        assert_eq!(report.materialization.incomplete[0].sample_id, "s2");

        let csv = fs::read_to_string(root.join("metadata.csv")).unwrap();
        assert!(!csv.contains("s2,"));
        for id in ["s0", "s1", "s3", "s4", "s5"] {
            assert!(csv.contains(&format!("{id},")), "{id} missing from manifest");
        }
        let summary = fs::read_to_string(root.join("summary.txt")).unwrap();
        assert!(summary.contains("s2 ("));
        assert!(summary.contains("missing artifact: post"));
    }

    #[test]
    fn rerun_produces_no_diff() {
        let (tmp, src) = setup();
        let root = tmp.path().join("out");
        let samples: Vec<Sample> = (0..20)
            .map(|i| {
                let (cx, cy) = ((i % 5) as f64 * 1.3 - 3.0, (i / 5) as f64 - 2.0);
                sample(&src, &format!("r{i:02}"), cx, cy)
            })
            .collect();
        let pipeline = DatasetPipeline::new(config(&root)).unwrap();

        let first = pipeline.run(&samples).unwrap();
        let before = snapshot(&root);
        let reversed: Vec<Sample> = samples.iter().rev().cloned().collect();
        let second = pipeline.run(&reversed).unwrap();

        assert_eq!(snapshot(&root), before);
        assert_eq!(first.materialization.files_written, 60);
        assert_eq!(second.materialization.files_written, 0);
        assert_eq!(
            first,
            RunReport { materialization: first.materialization.clone(), ..second.clone() }
        );
    }

    #[test]
    fn rerun_after_losing_an_artifact_counts_each_sample_once() {
        let (tmp, src) = setup();
        let root = tmp.path().join("out");
        let samples: Vec<Sample> = (0..3)
            .map(|i| sample(&src, &format!("s{i}"), i as f64 + 0.5, 0.5))
            .collect();
        let pipeline = DatasetPipeline::new(config(&root)).unwrap();

        let first = pipeline.run(&samples).unwrap();
        assert_eq!(first.manifest_rows, 3);
        assert!(root.join("train/s1/post.png").is_file());

        fs::remove_file(&samples[1].artifacts["post"]).unwrap();
        let second = pipeline.run(&samples).unwrap();

        assert_eq!(second.manifest_rows, 2);
        let c = &second.completeness;
        assert_eq!((c.total, c.complete), (3, 2));
        assert_eq!(c.split_counts.values().sum::<usize>(), 2);
        assert_eq!(c.incomplete.len(), 1);
        assert_eq!(c.incomplete[0].sample_id, "s1");
        assert_eq!(c.incomplete[0].reason, "missing artifact: post");
        assert!(!root.join("train/s1").exists());

        let audit = validate_triplets(&root, &config(&root).artifacts).unwrap();
        assert_eq!((audit.total, audit.complete), (2, 2));
    }

    #[test]
    fn bad_and_duplicate_samples_are_rejected_and_listed() {
        let (tmp, src) = setup();
        let root = tmp.path().join("out");
        let mut samples = vec![sample(&src, "a", 0.5, 0.5), sample(&src, "a", 3.5, 3.5)];
        samples.push(Sample::new("../escape", BBox::new(0.0, 0.0, 1.0, 1.0)));
        samples.push(Sample::new("flipped", BBox::new(1.0, 0.0, 0.0, 1.0)));

        let report = DatasetPipeline::new(config(&root)).unwrap().run(&samples).unwrap();
        assert_eq!(report.total_input, 4);
        assert_eq!(report.manifest_rows, 1);
        let rejected: Vec<&str> = report.rejected.iter().map(|r| r.sample_id.as_str()).collect();
        assert_eq!(rejected, vec!["a", "../escape", "flipped"]);
        assert!(report.rejected[0].reason.contains("more than once"));
        assert!(fs::read_to_string(root.join("summary.txt")).unwrap().contains("REJECTED SAMPLES"));
    }

    #[test]
    fn cancelled_run_still_reports_every_sample() {
        let (tmp, src) = setup();
        let root = tmp.path().join("out");
        let samples: Vec<Sample> =
            (0..4).map(|i| sample(&src, &format!("c{i}"), i as f64, 0.5)).collect();
        let pipeline = DatasetPipeline::new(config(&root)).unwrap();
        pipeline.cancel_token().cancel();

        let report = pipeline.run(&samples).unwrap();
        assert_eq!(report.manifest_rows, 0);
        assert_eq!(report.materialization.cancelled.len(), 4);
        assert_eq!(report.completeness.incomplete.len(), 4);

        // Resume with a fresh token.
        let resumed = DatasetPipeline::new(config(&root)).unwrap().run(&samples).unwrap();
        assert_eq!(resumed.manifest_rows, 4);
        assert!(resumed.is_clean());
    }

    #[test]
    fn json_only_manifest_and_empty_input() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        let cfg = DatasetConfig { manifest_formats: vec![ManifestFormat::Json], ..config(&root) };
        let report = DatasetPipeline::new(cfg).unwrap().run(&[]).unwrap();
        assert!(report.validation.empty);
        assert!(report.validation.passed);
        assert_eq!(report.manifest_files, vec![PathBuf::from("manifest.json")]);
        assert!(!root.join("metadata.csv").exists());
        for split in Split::ALL {
            assert!(root.join(split.as_str()).is_dir());
        }
    }

    #[test]
    fn year_distribution_counts_manifest_rows() {
        let row = |year| ManifestRow {
            sample_id: "x".into(),
            split: Split::Train,
            artifacts: BTreeMap::new(),
            label: None,
            year,
            bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
            properties: BTreeMap::new(),
        };
        let d = year_distribution(&[row(Some(2019)), row(None), row(Some(2019))]);
        assert_eq!(d["2019"], 2);
        assert_eq!(d["unknown"], 1);
    }

    #[cfg(feature = "threading")]
    #[test]
    fn worker_count_does_not_change_outputs() {
        let (tmp, src) = setup();
        let mut samples = hundred_over_nine_tiles(&src);
        fs::remove_file(&samples[40].artifacts["label"]).unwrap();
        samples.truncate(48);

        let run = |name: &str, workers: usize| {
            let root = tmp.path().join(name);
            let cfg = DatasetConfig { workers, ..config(&root) };
            let report = DatasetPipeline::new(cfg).unwrap().run(&samples).unwrap();
            (report, snapshot(&root))
        };
        let (single, single_files) = run("one", 1);
        let (pooled, pooled_files) = run("four", 4);

        assert_eq!(pooled.manifest_rows, 47);
        assert_eq!(pooled.completeness, single.completeness);
        assert_eq!(pooled_files, single_files);
        assert_eq!(pooled.completeness.incomplete[0].sample_id, "s040");
    }
}
