//! Error types.
//!
//! Configuration problems are fatal and surface before any sample is touched.
//! Per-sample problems are recoverable: they end up in the run report, not here.

use std::path::PathBuf;

use thiserror::Error;

use crate::split::Split;

/// Invalid configuration, rejected at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tile size must be a positive finite number of degrees (got {0})")]
    NonPositiveTileSize(f64),

    #[error("{split} percentage must be a positive finite number (got {value})")]
    NonPositivePercentage { split: Split, value: f64 },

    #[error("train/val/test percentages must sum to 100 (got {0})")]
    PercentageSum(f64),

    #[error("split tolerance must be a non-negative finite percentage (got {0})")]
    InvalidTolerance(f64),

    #[error("at least one required artifact must be configured")]
    NoArtifacts,

    #[error("artifact name {0:?} is not usable as a file name")]
    InvalidArtifactName(String),

    #[error("at least one manifest format must be configured")]
    NoManifestFormats,

    #[error("materialization timeout must be at least one second")]
    ZeroTimeout,
}

/// A sample that cannot enter the tile grid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("sample id {0:?} is not usable as a directory name")]
    InvalidId(String),

    #[error("sample {id}: bbox [{minx}, {miny}, {maxx}, {maxy}] is not a finite, ordered box")]
    InvalidBBox {
        id: String,
        minx: f64,
        miny: f64,
        maxx: f64,
        maxy: f64,
    },

    #[error("sample id {0:?} appears more than once")]
    DuplicateId(String),
}

/// Top-level error for the library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("output root {} is not writable", path.display())]
    OutputRootUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach a context string to an `io::Result`.
pub(crate) trait IoContext<T> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| Error::Io { context: f(), source })
    }
}
