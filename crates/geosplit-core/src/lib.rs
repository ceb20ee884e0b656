pub mod config;
pub mod coords;
pub mod error;
pub mod grid;
pub mod manifest;
pub mod organizer;
pub mod pipeline;
pub mod report;
pub mod sample;
pub mod split;

pub use config::{DatasetConfig, ImageFormat, ManifestFormat, Placement, SplitConfig};
pub use coords::{BBox, TileKey};
pub use error::{ConfigError, Error, Result, SampleError};
pub use grid::{GridStatistics, TileGrid};
pub use manifest::{ManifestRow, ManifestWriter};
pub use organizer::{
    validate_triplets, CancelToken, CompletenessReport, IncompleteTriplet, MaterializeReport,
    SampleJob, SampleOutcome, TripletOrganizer,
};
pub use pipeline::{DatasetPipeline, SplitPlan};
pub use report::RunReport;
pub use sample::{discover_samples, load_samples_json, Sample};
pub use split::{
    GeneratedSplits, Split, SplitAssigner, SplitAssignment, SplitStatistics, SplitTally,
    SplitValidationReport, SplitValidator,
};
