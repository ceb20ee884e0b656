//! Manifest of successfully materialized samples.
//!
//! One row per complete sample, sorted by sample id. The CSV and JSON
//! renderings carry the same fields; CSV flattens artifacts, bbox and
//! properties into columns.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::config::ManifestFormat;
use crate::coords::BBox;
use crate::error::{Error, IoContext, Result};
use crate::organizer::SampleOutcome;
use crate::sample::Sample;
use crate::split::Split;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestRow {
    pub sample_id: String,
    pub split: Split,
    /// Artifact name → path relative to the output root.
    #[serde(serialize_with = "serialize_slash_paths")]
    pub artifacts: BTreeMap<String, PathBuf>,
    pub label: Option<String>,
    pub year: Option<i32>,
    pub bbox: BBox,
    pub properties: BTreeMap<String, String>,
}

impl ManifestRow {
    /// Row for a sample that materialized completely; `None` for any other outcome.
    pub fn from_outcome(sample: &Sample, outcome: &SampleOutcome) -> Option<Self> {
        let SampleOutcome::Complete { sample_id, split, artifacts, .. } = outcome else {
            return None;
        };
        if *sample_id != sample.id {
            return None;
        }
        Some(Self {
            sample_id: sample.id.clone(),
            split: *split,
            artifacts: artifacts.clone(),
            label: sample.label.clone(),
            year: sample.year,
            bbox: sample.bbox,
            properties: sample.properties.clone(),
        })
    }
}

#[derive(Serialize)]
struct ManifestDocument<'a> {
    total_samples: usize,
    samples: Vec<&'a ManifestRow>,
}

/// Renders manifest rows. `artifacts` fixes the artifact columns and their order.
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    artifacts: Vec<String>,
}

impl ManifestWriter {
    pub fn new(artifacts: Vec<String>) -> Self {
        Self { artifacts }
    }

    /// Write `rows` to `destination`. Rows are sorted by sample id first, so
    /// the output does not depend on the order they were produced in.
    pub fn write(
        &self,
        rows: &[ManifestRow],
        destination: &Path,
        format: ManifestFormat,
    ) -> Result<()> {
        let mut sorted: Vec<&ManifestRow> = rows.iter().collect();
        sorted.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));

        let bytes = match format {
            ManifestFormat::Csv => self.render_csv(&sorted)?,
            ManifestFormat::Json => render_json(&sorted)?,
        };
        write_atomic(destination, &bytes)?;
        info!("wrote {} manifest rows to {}", sorted.len(), destination.display());
        Ok(())
    }

    /// Write every format into `dir` under its conventional file name.
    pub fn write_all(
        &self,
        rows: &[ManifestRow],
        dir: &Path,
        formats: &[ManifestFormat],
    ) -> Result<Vec<PathBuf>> {
        formats
            .iter()
            .map(|&f| {
                let dest = dir.join(f.file_name());
                self.write(rows, &dest, f).map(|_| dest)
            })
            .collect()
    }

    fn render_csv(&self, rows: &[&ManifestRow]) -> Result<Vec<u8>> {
        let property_keys: BTreeSet<&str> =
            rows.iter().flat_map(|r| r.properties.keys().map(String::as_str)).collect();

        let mut header: Vec<String> = vec!["sample_id".into(), "split".into()];
        header.extend(self.artifacts.iter().map(|a| format!("{a}_path")));
        header.extend(
            ["label", "year", "bbox_minx", "bbox_miny", "bbox_maxx", "bbox_maxy"].map(String::from),
        );
        header.extend(property_keys.iter().map(|k| format!("prop_{k}")));

        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&header)?;
        for row in rows {
            let mut record: Vec<String> = vec![row.sample_id.clone(), row.split.to_string()];
            record.extend(
                self.artifacts
                    .iter()
                    .map(|a| row.artifacts.get(a).map(|p| slash_path(p)).unwrap_or_default()),
            );
            record.push(row.label.clone().unwrap_or_default());
            record.push(row.year.map(|y| y.to_string()).unwrap_or_default());
            record.extend(row.bbox.as_array().iter().map(f64::to_string));
            record.extend(
                property_keys.iter().map(|k| row.properties.get(*k).cloned().unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }
        wtr.into_inner().map_err(|e| Error::Io {
            context: "flushing CSV manifest".into(),
            source: e.into_error(),
        })
    }
}

fn render_json(rows: &[&ManifestRow]) -> Result<Vec<u8>> {
    let doc = ManifestDocument { total_samples: rows.len(), samples: rows.to_vec() };
    let mut bytes = serde_json::to_vec_pretty(&doc).map_err(|source| Error::Json {
        context: "serializing manifest".into(),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// `/`-separated rendering of a relative path, identical on every platform.
pub fn slash_path(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Serializes artifact paths with [`slash_path`], matching the CSV columns.
pub(crate) fn serialize_slash_paths<S: serde::Serializer>(
    paths: &BTreeMap<String, PathBuf>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(paths.iter().map(|(name, p)| (name, slash_path(p))))
}

/// Write through a hidden sibling and rename, so readers never see a torn file.
pub(crate) fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{name}.partial"));
    fs::write(&tmp, bytes).io_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, dest)
        .io_context(|| format!("renaming {} to {}", tmp.display(), dest.display()))
}
