//! Sample records and the upstream adapters that produce them.
//!
//! Two sources are supported:
//! * a JSON sample list (`load_samples_json`)
//! * an imagery directory with one `metadata.json` per sample plus a flat
//!   directory of label patches (`discover_samples`)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::ImageFormat;
use crate::coords::BBox;
use crate::error::{Error, IoContext, Result, SampleError};

/// One geo-located sample: a bbox, a category and a set of named artifact files.
/// Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub id: String,
    pub bbox: BBox,
    /// Category, e.g. a loss bin such as `high_loss`.
    pub label: Option<String>,
    pub year: Option<i32>,
    /// Artifact name (`pre`, `post`, `label`, ...) → source file.
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Extra scalar attributes carried into the manifest as `prop_*` columns.
    pub properties: BTreeMap<String, String>,
}

impl Sample {
    pub fn new(id: impl Into<String>, bbox: BBox) -> Self {
        Self {
            id: id.into(),
            bbox,
            label: None,
            year: None,
            artifacts: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.insert(name.into(), path.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Check that the id is a single safe path component and the bbox is usable.
    pub fn check(&self) -> std::result::Result<(), SampleError> {
        if !is_path_component(&self.id) {
            return Err(SampleError::InvalidId(self.id.clone()));
        }
        if !self.bbox.is_valid() {
            let [minx, miny, maxx, maxy] = self.bbox.as_array();
            return Err(SampleError::InvalidBBox { id: self.id.clone(), minx, miny, maxx, maxy });
        }
        Ok(())
    }
}

/// True when `s` is non-empty and names exactly one normal path component.
pub(crate) fn is_path_component(s: &str) -> bool {
    if s.is_empty() || s.starts_with('.') || s.contains(['/', '\\']) {
        return false;
    }
    let mut comps = Path::new(s).components();
    matches!((comps.next(), comps.next()), (Some(Component::Normal(_)), None))
}

// ── JSON schema ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum SampleFile {
    List(Vec<SampleRecord>),
    Wrapped { samples: Vec<SampleRecord> },
}

#[derive(Deserialize)]
struct SampleRecord {
    sample_id: RawId,
    bbox: RawBBox,
    #[serde(default, alias = "loss_bin")]
    label: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    artifacts: BTreeMap<String, PathBuf>,
    #[serde(default)]
    properties: BTreeMap<String, JsonValue>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Int(i) => i.to_string(),
        }
    }
}

#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum RawBBox {
    Array([f64; 4]),
    Object { minx: f64, miny: f64, maxx: f64, maxy: f64 },
}

impl From<RawBBox> for BBox {
    fn from(raw: RawBBox) -> Self {
        match raw {
            RawBBox::Array([minx, miny, maxx, maxy]) => BBox::new(minx, miny, maxx, maxy),
            RawBBox::Object { minx, miny, maxx, maxy } => BBox::new(minx, miny, maxx, maxy),
        }
    }
}

fn property_text(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

// ── JSON sample list ─────────────────────────────────────────────────────────

/// Load samples from a JSON file holding either `[...]` or `{"samples": [...]}`.
/// Relative artifact paths are resolved against the file's directory.
pub fn load_samples_json(path: &Path) -> Result<Vec<Sample>> {
    let text = fs::read_to_string(path).io_context(|| format!("reading {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    parse_samples_json(&text, base).map_err(|source| Error::Json {
        context: format!("parsing {}", path.display()),
        source,
    })
}

fn parse_samples_json(text: &str, base: &Path) -> serde_json::Result<Vec<Sample>> {
    let records = match serde_json::from_str::<SampleFile>(text)? {
        SampleFile::List(v) | SampleFile::Wrapped { samples: v } => v,
    };
    Ok(records
        .into_iter()
        .map(|r| Sample {
            id: r.sample_id.into_string(),
            bbox: r.bbox.into(),
            label: r.label,
            year: r.year,
            artifacts: r
                .artifacts
                .into_iter()
                .map(|(k, p)| {
                    let p = if p.is_relative() { base.join(p) } else { p };
                    (k, p)
                })
                .collect(),
            properties: r.properties.iter().map(|(k, v)| (k.clone(), property_text(v))).collect(),
        })
        .collect())
}

// ── Directory discovery ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ImageryMetadata {
    bbox: RawBBox,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default, alias = "label")]
    loss_bin: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, JsonValue>,
}

/// Discover samples laid out by the imagery download step:
/// `imagery_dir/<sample_id>/{metadata.json, pre.*, post.*}` with labels in
/// `patches_dir/<sample_id>.tif`.
///
/// Artifacts are recorded whether or not the files exist; absence is reported
/// later as a missing artifact.
pub fn discover_samples(
    imagery_dir: &Path,
    patches_dir: &Path,
    format: ImageFormat,
) -> Result<Vec<Sample>> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(imagery_dir)
        .io_context(|| format!("reading imagery directory {}", imagery_dir.display()))?
    {
        let entry = entry.io_context(|| format!("listing {}", imagery_dir.display()))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let patch_files = list_tifs(patches_dir)?;

    let mut samples = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            warn!("skipping non UTF-8 sample directory {}", dir.display());
            continue;
        };
        let meta_path = dir.join("metadata.json");
        if !meta_path.is_file() {
            warn!("no metadata.json for {id}, skipping");
            continue;
        }
        let meta: ImageryMetadata = match fs::read_to_string(&meta_path)
            .map_err(|e| e.to_string())
            .and_then(|t| serde_json::from_str(&t).map_err(|e| e.to_string()))
        {
            Ok(m) => m,
            Err(e) => {
                warn!("failed to read metadata for {id}: {e}");
                continue;
            }
        };

        let mut sample = Sample {
            id: id.clone(),
            bbox: meta.bbox.into(),
            label: meta.loss_bin,
            year: meta.year,
            artifacts: BTreeMap::new(),
            properties: meta
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), property_text(v)))
                .collect(),
        };
        for prefix in ["pre", "post"] {
            sample.artifacts.insert(prefix.to_owned(), pick_imagery(&dir, prefix, format));
        }
        sample.artifacts.insert("label".to_owned(), find_label(patches_dir, &patch_files, &id));
        samples.push(sample);
    }

    info!("discovered {} samples in {}", samples.len(), imagery_dir.display());
    Ok(samples)
}

/// Choose the imagery file for `prefix` according to the configured format.
/// `Both` prefers PNG and falls back to GeoTIFF.
fn pick_imagery(dir: &Path, prefix: &str, format: ImageFormat) -> PathBuf {
    let png = dir.join(format!("{prefix}.png"));
    let tif = dir.join(format!("{prefix}.tif"));
    match format {
        ImageFormat::Png => png,
        ImageFormat::GeoTiff => tif,
        ImageFormat::Both => {
            if png.is_file() || !tif.is_file() {
                png
            } else {
                tif
            }
        }
    }
}

fn list_tifs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        warn!("label patch directory {} not found", dir.display());
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).io_context(|| format!("reading {}", dir.display()))? {
        let entry = entry.io_context(|| format!("listing {}", dir.display()))?;
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(".tif") {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// `<patches>/<id>.tif`, else the first patch whose name contains the id.
fn find_label(patches_dir: &Path, patch_files: &[String], id: &str) -> PathBuf {
    let exact = patches_dir.join(format!("{id}.tif"));
    if exact.is_file() {
        return exact;
    }
    match patch_files.iter().find(|n| n.contains(id)) {
        Some(name) => patches_dir.join(name),
        None => exact,
    }
}
