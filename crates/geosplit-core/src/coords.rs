/// Planar/geographic bounding boxes and grid tile addressing.
/// All coordinate math uses f64 for precision.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in the samples' coordinate system
/// (degrees for geographic data: x = longitude, y = latitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BBox {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Midpoint of the box.
    pub fn center(&self) -> (f64, f64) {
        ((self.minx + self.maxx) / 2.0, (self.miny + self.maxy) / 2.0)
    }

    /// True when all four edges are finite and min <= max on both axes.
    pub fn is_valid(&self) -> bool {
        [self.minx, self.miny, self.maxx, self.maxy]
            .iter()
            .all(|v| v.is_finite())
            && self.minx <= self.maxx
            && self.miny <= self.maxy
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }
}

/// A cell of a regular grid with square cells of `tile_size` units.
///
/// Tile `(x, y)` covers `[x * size, (x + 1) * size) × [y * size, (y + 1) * size)`:
/// lower edges are inclusive, upper edges exclusive, on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub x: i64,
    pub y: i64,
}

impl TileKey {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Tile containing the point `(px, py)`.
    ///
    /// Uses floor, not truncation, so that `-0.5` lands in tile `-1` and the
    /// bucket boundaries stay uniform across the origin.
    pub fn from_point(px: f64, py: f64, tile_size: f64) -> Self {
        Self {
            x: (px / tile_size).floor() as i64,
            y: (py / tile_size).floor() as i64,
        }
    }

    /// Tile containing the center of `bbox`.
    pub fn from_bbox(bbox: &BBox, tile_size: f64) -> Self {
        let (cx, cy) = bbox.center();
        Self::from_point(cx, cy, tile_size)
    }

    /// Returns the (minx, miny, maxx, maxy) extent of this tile.
    ///
    /// Computed in f64 so keys saturated by `from_point` at `i64::MAX` stay usable.
    pub fn bounds(&self, tile_size: f64) -> BBox {
        let (x, y) = (self.x as f64, self.y as f64);
        BBox::new(x * tile_size, y * tile_size, (x + 1.0) * tile_size, (y + 1.0) * tile_size)
    }

    /// Canonical string form, `tile_<x>_<y>`. This is the input to the split hash,
    /// so it must never change.
    pub fn canonical(&self) -> String {
        format!("tile_{}_{}", self.x, self.y)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile_{}_{}", self.x, self.y)
    }
}
