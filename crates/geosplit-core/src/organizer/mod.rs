//! Triplet organizer: materializes `<root>/<split>/<sample_id>/<artifact>.<ext>`.
//!
//! Each sample is independent. A sample with a missing artifact is marked
//! incomplete and nothing is written for it; an I/O error on one sample is
//! recorded against that sample and the batch carries on. Only an unusable
//! output root aborts the run, and it does so before any sample is attempted.
//!
//! Directories an earlier run left for a sample outside its current split are
//! removed once the sample is resolved, as is the directory of a sample that
//! is now incomplete.

pub mod completeness;
pub mod place;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::Serialize;

use crate::config::Placement;
use crate::error::{Error, IoContext, Result};
use crate::sample::Sample;
use crate::split::Split;

pub use completeness::{validate_triplets, CompletenessReport, IncompleteTriplet};
pub use place::{canonical_file_name, Placed};

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Shared flag checked before each sample. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// A sample with its resolved split, ready to be materialized.
#[derive(Debug, Clone, Copy)]
pub struct SampleJob<'a> {
    pub sample: &'a Sample,
    pub split: Split,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleOutcome {
    /// Every artifact is in place. Paths are relative to the output root.
    Complete {
        sample_id: String,
        split: Split,
        #[serde(serialize_with = "crate::manifest::serialize_slash_paths")]
        artifacts: BTreeMap<String, PathBuf>,
        /// Files written this run; 0 when the tree was already up to date.
        written: usize,
    },
    /// One or more required artifacts do not exist on disk.
    Incomplete {
        sample_id: String,
        split: Split,
        missing: Vec<String>,
    },
    /// I/O error while placing files.
    Failed {
        sample_id: String,
        split: Split,
        cause: String,
    },
    /// Not attempted because the run was cancelled or hit its deadline.
    Cancelled { sample_id: String, split: Split },
}

impl SampleOutcome {
    pub fn sample_id(&self) -> &str {
        match self {
            SampleOutcome::Complete { sample_id, .. }
            | SampleOutcome::Incomplete { sample_id, .. }
            | SampleOutcome::Failed { sample_id, .. }
            | SampleOutcome::Cancelled { sample_id, .. } => sample_id,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SampleOutcome::Complete { .. })
    }

    /// Why the sample is not in the manifest, if it isn't.
    pub fn reason(&self) -> Option<String> {
        match self {
            SampleOutcome::Complete { .. } => None,
            SampleOutcome::Incomplete { missing, .. } => {
                Some(completeness::missing_reason(missing))
            }
            SampleOutcome::Failed { cause, .. } => Some(format!("I/O failure: {cause}")),
            SampleOutcome::Cancelled { .. } => Some("cancelled before materialization".to_owned()),
        }
    }
}

/// Per-sample outcomes of one materialization pass, sorted by sample id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializeReport {
    pub outcomes: Vec<SampleOutcome>,
}

impl MaterializeReport {
    pub fn complete(&self) -> impl Iterator<Item = &SampleOutcome> {
        self.outcomes.iter().filter(|o| o.is_complete())
    }

    pub fn not_complete(&self) -> impl Iterator<Item = &SampleOutcome> {
        self.outcomes.iter().filter(|o| !o.is_complete())
    }

    pub fn count_complete(&self) -> usize {
        self.complete().count()
    }

    pub fn count_where(&self, pred: impl Fn(&SampleOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    pub fn files_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                SampleOutcome::Complete { written, .. } => *written,
                _ => 0,
            })
            .sum()
    }
}

// ── Organizer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TripletOrganizer {
    root: PathBuf,
    artifacts: Vec<String>,
    placement: Placement,
    workers: usize,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl TripletOrganizer {
    /// `artifacts` are the required artifact names, also used as file stems.
    pub fn new(root: impl Into<PathBuf>, artifacts: Vec<String>, placement: Placement) -> Self {
        Self {
            root: root.into(),
            artifacts,
            placement,
            workers: 0,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Worker threads for materialization; 0 = one per core.
    /// Ignored without the `threading` feature.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }

    /// Create the root and split directories and make sure files can be
    /// created there. Existing directories are fine.
    pub fn prepare(&self) -> Result<()> {
        let unwritable = |source| Error::OutputRootUnwritable { path: self.root.clone(), source };
        fs::create_dir_all(&self.root).map_err(unwritable)?;
        for split in Split::ALL {
            fs::create_dir_all(self.root.join(split.as_str())).map_err(unwritable)?;
        }
        let probe = self.root.join(".write_probe");
        fs::write(&probe, b"").map_err(unwritable)?;
        fs::remove_file(&probe).io_context(|| format!("removing {}", probe.display()))?;
        Ok(())
    }

    /// Materialize every job. Jobs are processed independently, possibly in
    /// parallel; outcomes come back sorted by sample id.
    pub fn materialize(&self, jobs: &[SampleJob<'_>]) -> Result<MaterializeReport> {
        self.prepare()?;

        let mut jobs: Vec<SampleJob<'_>> = jobs.to_vec();
        jobs.sort_by(|a, b| a.sample.id.cmp(&b.sample.id));

        let deadline = self.timeout.map(|t| Instant::now() + t);
        info!("materializing {} samples into {}", jobs.len(), self.root.display());

        let outcomes = self.run_jobs(&jobs, deadline)?;
        let report = MaterializeReport { outcomes };

        info!(
            "materialized {} of {} samples ({} files written)",
            report.count_complete(),
            report.outcomes.len(),
            report.files_written()
        );
        Ok(report)
    }

    #[cfg(feature = "threading")]
    fn run_jobs(
        &self,
        jobs: &[SampleJob<'_>],
        deadline: Option<Instant>,
    ) -> Result<Vec<SampleOutcome>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        Ok(pool.install(|| jobs.par_iter().map(|job| self.run_job(job, deadline)).collect()))
    }

    #[cfg(not(feature = "threading"))]
    fn run_jobs(
        &self,
        jobs: &[SampleJob<'_>],
        deadline: Option<Instant>,
    ) -> Result<Vec<SampleOutcome>> {
        Ok(jobs.iter().map(|job| self.run_job(job, deadline)).collect())
    }

    fn run_job(&self, job: &SampleJob<'_>, deadline: Option<Instant>) -> SampleOutcome {
        let sample_id = job.sample.id.clone();
        let split = job.split;

        if self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
            return SampleOutcome::Cancelled { sample_id, split };
        }

        let outcome = self.place_sample(job.sample, split);
        match &outcome {
            SampleOutcome::Complete { .. } => self.remove_stale(&sample_id, Some(split)),
            SampleOutcome::Incomplete { missing, .. } => {
                warn!("sample {sample_id} incomplete, {}", completeness::missing_reason(missing));
                self.remove_stale(&sample_id, None);
            }
            SampleOutcome::Failed { cause, .. } => warn!("sample {sample_id} failed: {cause}"),
            SampleOutcome::Cancelled { .. } => {}
        }
        outcome
    }

    /// Delete directories an earlier run left for `sample_id` in any split
    /// other than `keep`. Failures are logged; the manifest never lists them.
    fn remove_stale(&self, sample_id: &str, keep: Option<Split>) {
        for split in Split::ALL.into_iter().filter(|s| Some(*s) != keep) {
            let dir = self.root.join(split.as_str()).join(sample_id);
            if !dir.is_dir() {
                continue;
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => info!("removed stale {}", dir.display()),
                Err(e) => warn!("could not remove stale {}: {e}", dir.display()),
            }
        }
    }

    /// Place one sample's artifacts. Nothing is written unless every required
    /// artifact resolves to an existing file.
    pub fn place_sample(&self, sample: &Sample, split: Split) -> SampleOutcome {
        let sample_id = sample.id.clone();

        let mut sources: Vec<(&str, &Path)> = Vec::with_capacity(self.artifacts.len());
        let mut missing = Vec::new();
        for name in &self.artifacts {
            match sample.artifacts.get(name) {
                Some(p) if p.is_file() => sources.push((name, p)),
                _ => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return SampleOutcome::Incomplete { sample_id, split, missing };
        }

        let rel_dir = PathBuf::from(split.as_str()).join(&sample.id);
        let dir = self.root.join(&rel_dir);
        if let Err(e) = fs::create_dir_all(&dir) {
            return SampleOutcome::Failed {
                sample_id,
                split,
                cause: format!("creating {}: {e}", dir.display()),
            };
        }

        let mut artifacts = BTreeMap::new();
        let mut written = 0;
        for (name, source) in sources {
            let file_name = canonical_file_name(name, source);
            match place::place(source, &dir.join(&file_name), self.placement) {
                Ok(Placed::Written) => written += 1,
                Ok(Placed::Unchanged) => {}
                Err(e) => {
                    return SampleOutcome::Failed {
                        sample_id,
                        split,
                        cause: format!("placing {name} from {}: {e}", source.display()),
                    };
                }
            }
            artifacts.insert(name.to_owned(), rel_dir.join(file_name));
        }

        SampleOutcome::Complete { sample_id, split, artifacts, written }
    }

    /// Audit the tree under this organizer's root.
    pub fn validate_triplets(&self) -> Result<CompletenessReport> {
        validate_triplets(&self.root, &self.artifacts)
    }
}
