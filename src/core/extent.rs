use serde::{Deserialize, Serialize};

use super::projection::Crs;
use crate::types::{StackError, StackResult};

/// Points sampled along each edge when an extent is reprojected
const EDGE_DENSIFY: usize = 21;

/// Immutable axis-aligned region of interest in a given CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoExtent {
    crs: Crs,
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl GeoExtent {
    pub fn new(crs: Crs, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> StackResult<Self> {
        if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) {
            return Err(StackError::InvalidExtent(
                "extent bounds must be finite".to_string(),
            ));
        }
        if min_x >= max_x || min_y >= max_y {
            return Err(StackError::InvalidExtent(format!(
                "empty extent [{}, {}] x [{}, {}]",
                min_x, max_x, min_y, max_y
            )));
        }
        Ok(Self {
            crs,
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Longitude/latitude rectangle in degrees
    pub fn from_lon_lat(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> StackResult<Self> {
        Self::new(Crs::Geographic, min_lon, min_lat, max_lon, max_lat)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Half-open containment test: min edges inclusive, max edges exclusive
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    pub fn intersects(&self, other: &GeoExtent) -> StackResult<bool> {
        Ok(self.intersection(other)?.is_some())
    }

    /// Overlap of two extents, expressed in this extent's CRS
    pub fn intersection(&self, other: &GeoExtent) -> StackResult<Option<GeoExtent>> {
        let other = other.to_crs(self.crs)?;
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);
        if min_x >= max_x || min_y >= max_y {
            return Ok(None);
        }
        Ok(Some(GeoExtent::new(self.crs, min_x, min_y, max_x, max_y)?))
    }

    /// Envelope of this extent reprojected into `target`.
    ///
    /// Edges are densified so curved edges in the target CRS are enclosed.
    pub fn to_crs(&self, target: Crs) -> StackResult<GeoExtent> {
        if self.crs == target {
            return Ok(*self);
        }

        let transformer = self.crs.transformer_to(target)?;
        let mut envelope: Option<(f64, f64, f64, f64)> = None;
        for i in 0..EDGE_DENSIFY {
            let f = i as f64 / (EDGE_DENSIFY - 1) as f64;
            let x = self.min_x + f * self.width();
            let y = self.min_y + f * self.height();
            let edge_points = [
                (x, self.min_y),
                (x, self.max_y),
                (self.min_x, y),
                (self.max_x, y),
            ];
            for (px, py) in edge_points {
                if let Some((tx, ty)) = transformer.transform(px, py) {
                    envelope = Some(match envelope {
                        None => (tx, ty, tx, ty),
                        Some((x0, y0, x1, y1)) => {
                            (x0.min(tx), y0.min(ty), x1.max(tx), y1.max(ty))
                        }
                    });
                }
            }
        }

        let (min_x, min_y, max_x, max_y) = envelope.ok_or_else(|| {
            StackError::Projection(format!(
                "extent in {} has no footprint in {}",
                self.crs, target
            ))
        })?;
        GeoExtent::new(target, min_x, min_y, max_x, max_y)
    }
}
