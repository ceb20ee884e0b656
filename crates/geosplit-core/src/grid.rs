/// Tile grid: buckets samples by the grid cell holding their bbox center.
///
/// Tiles are created lazily on first insertion and never merged or split.
/// Iteration is always in `TileKey` order so downstream output does not depend
/// on insertion order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::coords::{BBox, TileKey};
use crate::error::ConfigError;
use crate::sample::Sample;

#[derive(Debug, Clone)]
pub struct TileGrid {
    tile_size: f64,
    tiles: BTreeMap<TileKey, BTreeSet<String>>,
    index: HashMap<String, TileKey>,
}

/// Coverage summary for a grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridStatistics {
    pub total_tiles: usize,
    pub total_samples: usize,
    pub samples_per_tile_min: usize,
    pub samples_per_tile_max: usize,
    pub samples_per_tile_mean: f64,
}

impl TileGrid {
    /// A non-positive or non-finite tile size is rejected here, not on first insert.
    pub fn new(tile_size: f64) -> Result<Self, ConfigError> {
        if !(tile_size.is_finite() && tile_size > 0.0) {
            return Err(ConfigError::NonPositiveTileSize(tile_size));
        }
        Ok(Self {
            tile_size,
            tiles: BTreeMap::new(),
            index: HashMap::new(),
        })
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Tile key for a bbox under this grid's tile size.
    pub fn key_for(&self, bbox: &BBox) -> TileKey {
        TileKey::from_bbox(bbox, self.tile_size)
    }

    /// Place a sample into the tile holding its bbox center and return that tile.
    pub fn add_sample(&mut self, sample: &Sample) -> TileKey {
        self.insert(&sample.id, &sample.bbox)
    }

    /// Re-inserting an id moves it to the tile of the new bbox; ids are unique
    /// within a grid.
    pub fn insert(&mut self, id: &str, bbox: &BBox) -> TileKey {
        let key = self.key_for(bbox);
        if let Some(old) = self.index.insert(id.to_owned(), key) {
            if old != key {
                if let Some(members) = self.tiles.get_mut(&old) {
                    members.remove(id);
                    if members.is_empty() {
                        self.tiles.remove(&old);
                    }
                }
            }
        }
        self.tiles.entry(key).or_default().insert(id.to_owned());
        key
    }

    /// Non-empty tiles with their member ids, in key order.
    pub fn tiles(&self) -> impl Iterator<Item = (&TileKey, &BTreeSet<String>)> {
        self.tiles.iter()
    }

    pub fn members(&self, key: &TileKey) -> Option<&BTreeSet<String>> {
        self.tiles.get(key)
    }

    pub fn tile_of(&self, id: &str) -> Option<TileKey> {
        self.index.get(id).copied()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn sample_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn statistics(&self) -> GridStatistics {
        let counts: Vec<usize> = self.tiles.values().map(BTreeSet::len).collect();
        let total: usize = counts.iter().sum();
        GridStatistics {
            total_tiles: counts.len(),
            total_samples: total,
            samples_per_tile_min: counts.iter().copied().min().unwrap_or(0),
            samples_per_tile_max: counts.iter().copied().max().unwrap_or(0),
            samples_per_tile_mean: if counts.is_empty() {
                0.0
            } else {
                total as f64 / counts.len() as f64
            },
        }
    }
}
