//! Run configuration.
//!
//! `SplitConfig` can only be obtained through `SplitConfig::new` (serde goes
//! through the same path), so every instance in the program is valid.
//! `DatasetConfig` is checked once by `validate()` before a run starts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sample::is_path_component;
use crate::split::Split;

/// Allowed slack when checking that the three percentages sum to 100.
pub const PCT_SUM_EPSILON: f64 = 1e-3;

// ── SplitConfig ───────────────────────────────────────────────────────────────

/// Target split percentages and the tile size used to bucket samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSplitConfig", into = "RawSplitConfig")]
pub struct SplitConfig {
    train_pct: f64,
    val_pct: f64,
    test_pct: f64,
    tile_size_deg: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawSplitConfig {
    #[serde(default = "default_train")]
    train_pct: f64,
    #[serde(default = "default_val")]
    val_pct: f64,
    #[serde(default = "default_test")]
    test_pct: f64,
    #[serde(default = "default_tile_size")]
    tile_size_deg: f64,
}

fn default_train() -> f64 {
    70.0
}

fn default_val() -> f64 {
    15.0
}

fn default_test() -> f64 {
    15.0
}

fn default_tile_size() -> f64 {
    1.0
}

impl TryFrom<RawSplitConfig> for SplitConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSplitConfig) -> Result<Self, Self::Error> {
        SplitConfig::new(raw.train_pct, raw.val_pct, raw.test_pct, raw.tile_size_deg)
    }
}

impl From<SplitConfig> for RawSplitConfig {
    fn from(c: SplitConfig) -> Self {
        Self {
            train_pct: c.train_pct,
            val_pct: c.val_pct,
            test_pct: c.test_pct,
            tile_size_deg: c.tile_size_deg,
        }
    }
}

impl SplitConfig {
    /// Validate and build. Percentages are never clamped or renormalized.
    pub fn new(
        train_pct: f64,
        val_pct: f64,
        test_pct: f64,
        tile_size_deg: f64,
    ) -> Result<Self, ConfigError> {
        if !(tile_size_deg.is_finite() && tile_size_deg > 0.0) {
            return Err(ConfigError::NonPositiveTileSize(tile_size_deg));
        }
        let targets = [(Split::Train, train_pct), (Split::Val, val_pct), (Split::Test, test_pct)];
        for (split, value) in targets {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositivePercentage { split, value });
            }
        }
        let total = train_pct + val_pct + test_pct;
        if (total - 100.0).abs() > PCT_SUM_EPSILON {
            return Err(ConfigError::PercentageSum(total));
        }
        Ok(Self { train_pct, val_pct, test_pct, tile_size_deg })
    }

    pub fn tile_size_deg(&self) -> f64 {
        self.tile_size_deg
    }

    /// Target percentage for one split.
    pub fn target(&self, split: Split) -> f64 {
        match split {
            Split::Train => self.train_pct,
            Split::Val => self.val_pct,
            Split::Test => self.test_pct,
        }
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_pct: default_train(),
            val_pct: default_val(),
            test_pct: default_test(),
            tile_size_deg: default_tile_size(),
        }
    }
}

// ── Materialization options ──────────────────────────────────────────────────

/// How an artifact is placed into the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    #[default]
    Copy,
    Hardlink,
    /// Unix only.
    Symlink,
}

/// Which imagery files directory discovery picks up for `pre`/`post`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "tif", alias = "tiff")]
    GeoTiff,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    /// Flat rows, `metadata.csv`.
    Csv,
    /// Nested records, `manifest.json`.
    Json,
}

impl ManifestFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            ManifestFormat::Csv => "metadata.csv",
            ManifestFormat::Json => "manifest.json",
        }
    }
}

// ── DatasetConfig ─────────────────────────────────────────────────────────────

/// Everything a pipeline run needs besides the samples themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub split: SplitConfig,
    /// Allowed |actual% - target%| per split before the validator warns.
    pub tolerance_pct: f64,
    pub output_root: PathBuf,
    pub placement: Placement,
    pub image_format: ImageFormat,
    /// Artifacts every sample must provide; also the canonical file stems.
    pub artifacts: Vec<String>,
    pub manifest_formats: Vec<ManifestFormat>,
    /// Materialization threads; 0 = one per core.
    pub workers: usize,
    /// Coarse deadline for materialization, checked between samples.
    pub timeout_secs: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            split: SplitConfig::default(),
            tolerance_pct: 5.0,
            output_root: PathBuf::from("dataset"),
            placement: Placement::Copy,
            image_format: ImageFormat::Png,
            artifacts: vec!["pre".into(), "post".into(), "label".into()],
            manifest_formats: vec![ManifestFormat::Csv, ManifestFormat::Json],
            workers: 0,
            timeout_secs: None,
        }
    }
}

impl DatasetConfig {
    /// Reject invalid combinations before any sample is processed.
    /// `split` is already valid by construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance_pct.is_finite() && self.tolerance_pct >= 0.0) {
            return Err(ConfigError::InvalidTolerance(self.tolerance_pct));
        }
        if self.artifacts.is_empty() {
            return Err(ConfigError::NoArtifacts);
        }
        let bad_name = |a: &&String| !is_path_component(a) || a.contains('.');
        if let Some(bad) = self.artifacts.iter().find(bad_name) {
            return Err(ConfigError::InvalidArtifactName(bad.clone()));
        }
        if self.manifest_formats.is_empty() {
            return Err(ConfigError::NoManifestFormats);
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_default_targets() {
        let c = SplitConfig::new(70.0, 15.0, 15.0, 1.0).unwrap();
        assert_eq!(c.target(Split::Val), 15.0);
        assert_eq!(c, SplitConfig::default());
    }

    #[test]
    fn rejects_sum_not_100() {
        assert_eq!(
            SplitConfig::new(70.0, 15.0, 10.0, 1.0),
            Err(ConfigError::PercentageSum(95.0))
        );
        assert!(SplitConfig::new(70.0, 15.0, 15.0005, 1.0).is_ok());
        assert!(SplitConfig::new(70.0, 15.0, 15.01, 1.0).is_err());
    }

    #[test]
    fn rejects_non_positive_values() {
        assert!(matches!(
            SplitConfig::new(85.0, 15.0, 0.0, 1.0),
            Err(ConfigError::NonPositivePercentage { split: Split::Test, .. })
        ));
        assert!(matches!(
            SplitConfig::new(110.0, -10.0, 0.0, 1.0),
            Err(ConfigError::NonPositivePercentage { split: Split::Val, .. })
        ));
        assert_eq!(
            SplitConfig::new(70.0, 15.0, 15.0, 0.0),
            Err(ConfigError::NonPositiveTileSize(0.0))
        );
        assert!(SplitConfig::new(70.0, 15.0, 15.0, -1.0).is_err());
        assert!(SplitConfig::new(70.0, 15.0, 15.0, f64::NAN).is_err());
    }

    #[test]
    fn serde_routes_through_validation() {
        let ok: SplitConfig =
            serde_json::from_str(r#"{"train_pct": 80, "val_pct": 10, "test_pct": 10}"#).unwrap();
        assert_eq!(ok.target(Split::Train), 80.0);
        assert_eq!(ok.tile_size_deg(), 1.0);

        let short_sum = r#"{"train_pct": 70, "val_pct": 15, "test_pct": 10}"#;
        let bad = serde_json::from_str::<SplitConfig>(short_sum);
        assert!(bad.is_err());
        let bad = serde_json::from_str::<SplitConfig>(r#"{"tile_size_deg": 0}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn dataset_config_from_partial_json() {
        let c: DatasetConfig = serde_json::from_str(
            r#"{"split": {"tile_size_deg": 0.5}, "placement": "hardlink", "image_format": "tif",
                "manifest_formats": ["csv"], "workers": 4}"#,
        )
        .unwrap();
        assert_eq!(c.split.tile_size_deg(), 0.5);
        assert_eq!(c.placement, Placement::Hardlink);
        assert_eq!(c.image_format, ImageFormat::GeoTiff);
        assert_eq!(c.manifest_formats, vec![ManifestFormat::Csv]);
        assert_eq!(c.artifacts, vec!["pre", "post", "label"]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn dataset_config_validation() {
        let mut c = DatasetConfig::default();
        c.tolerance_pct = -1.0;
        assert_eq!(c.validate(), Err(ConfigError::InvalidTolerance(-1.0)));

        let mut c = DatasetConfig::default();
        c.artifacts.clear();
        assert_eq!(c.validate(), Err(ConfigError::NoArtifacts));

        let mut c = DatasetConfig::default();
        c.artifacts.push("../escape".into());
        assert!(matches!(c.validate(), Err(ConfigError::InvalidArtifactName(_))));

        let mut c = DatasetConfig::default();
        c.timeout_secs = Some(0);
        assert_eq!(c.validate(), Err(ConfigError::ZeroTimeout));
    }
}
