//! Tile → split assignment.
//!
//! Every tile is bucketed independently by a fixed hash of its key, so the
//! split of a tile depends only on the tile key and the target percentages.
//! All samples of a tile share its split: spatially adjacent samples cannot
//! leak across train/val/test.

pub mod hash;
pub mod validator;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::SplitConfig;
use crate::coords::TileKey;
use crate::grid::TileGrid;

pub use validator::{SplitCheck, SplitValidationReport, SplitValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(format!("unknown split {other:?}")),
        }
    }
}

// ── Assignment ────────────────────────────────────────────────────────────────

/// Tile → split mapping, computed once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    tiles: BTreeMap<TileKey, Split>,
}

impl SplitAssignment {
    pub fn split_of_tile(&self, key: &TileKey) -> Option<Split> {
        self.tiles.get(key).copied()
    }

    /// Split of a sample, looked up through the grid that placed it.
    pub fn split_of_sample(&self, grid: &TileGrid, id: &str) -> Option<Split> {
        grid.tile_of(id).and_then(|k| self.split_of_tile(&k))
    }

    /// Every sample in the grid with its split, sorted by sample id.
    pub fn sample_splits(&self, grid: &TileGrid) -> BTreeMap<String, Split> {
        grid.tiles()
            .filter_map(|(key, members)| self.split_of_tile(key).map(|s| (members, s)))
            .flat_map(|(members, s)| members.iter().map(move |id| (id.clone(), s)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileKey, &Split)> {
        self.tiles.iter()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Per-split aggregate counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SplitTally {
    pub tiles: usize,
    pub samples: usize,
    /// Share of all placed samples, 0–100. Zero when there are no samples.
    pub percentage: f64,
}

/// Empirical split composition. Always carries an entry for all three splits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitStatistics {
    pub total_tiles: usize,
    pub total_samples: usize,
    pub splits: BTreeMap<Split, SplitTally>,
}

impl SplitStatistics {
    pub fn tally(&self, split: Split) -> SplitTally {
        self.splits.get(&split).copied().unwrap_or_default()
    }
}

/// Output of `SplitAssigner::generate_splits`.
#[derive(Debug, Clone)]
pub struct GeneratedSplits {
    pub assignment: SplitAssignment,
    pub statistics: SplitStatistics,
}

// ── Assigner ──────────────────────────────────────────────────────────────────

/// Maps tiles to splits by comparing a hash bucket in `[0, 100)` against
/// cumulative thresholds: `b < train` → train, `b < train + val` → val,
/// otherwise test.
#[derive(Debug, Clone)]
pub struct SplitAssigner {
    config: SplitConfig,
}

impl SplitAssigner {
    /// `config` is validated by construction.
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Split for a single tile. Pure in (tile key, config).
    pub fn assign_tile(&self, key: &TileKey) -> Split {
        let b = f64::from(hash::bucket(&key.canonical()));
        let train = self.config.target(Split::Train);
        let val = self.config.target(Split::Val);
        if b < train {
            Split::Train
        } else if b < train + val {
            Split::Val
        } else {
            Split::Test
        }
    }

    /// Assign every non-empty tile of `grid` and tally the result.
    pub fn generate_splits(&self, grid: &TileGrid) -> GeneratedSplits {
        let mut tiles = BTreeMap::new();
        let mut splits: BTreeMap<Split, SplitTally> =
            Split::ALL.iter().map(|&s| (s, SplitTally::default())).collect();

        for (key, members) in grid.tiles() {
            let split = self.assign_tile(key);
            tiles.insert(*key, split);
            if let Some(t) = splits.get_mut(&split) {
                t.tiles += 1;
                t.samples += members.len();
            }
        }

        let total_samples: usize = splits.values().map(|t| t.samples).sum();
        if total_samples > 0 {
            for t in splits.values_mut() {
                t.percentage = t.samples as f64 / total_samples as f64 * 100.0;
            }
        }

        let statistics = SplitStatistics {
            total_tiles: tiles.len(),
            total_samples,
            splits,
        };

        info!(
            "assigned {} tiles: train={} val={} test={} samples",
            statistics.total_tiles,
            statistics.tally(Split::Train).samples,
            statistics.tally(Split::Val).samples,
            statistics.tally(Split::Test).samples,
        );

        GeneratedSplits {
            assignment: SplitAssignment { tiles },
            statistics,
        }
    }
}
