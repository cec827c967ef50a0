use chrono::{DateTime, Utc};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::ops::{Range, RangeInclusive};

use crate::core::extent::GeoExtent;
use crate::core::projection::Crs;
use crate::core::year_index::YearInterval;

/// Fraction of a pixel within which an extent edge counts as on the boundary
const EDGE_TOLERANCE: f64 = 1e-9;

/// Per-pixel band values; masked (nodata) pixels are `NaN`
pub type BandData = Array2<f32>;

/// Calendar year attached to a composite or classification layer
pub type YearTag = i32;

/// Fixed name of the classification band in every ClassRaster and training stack
pub const CLASS_BAND: &str = "landcover";

/// IGBP land-cover legend used by the coarse classification product
pub const IGBP_CLASSES: [(i32, &str); 17] = [
    (1, "Evergreen Needleleaf Forests"),
    (2, "Evergreen Broadleaf Forests"),
    (3, "Deciduous Needleleaf Forests"),
    (4, "Deciduous Broadleaf Forests"),
    (5, "Mixed Forests"),
    (6, "Closed Shrublands"),
    (7, "Open Shrublands"),
    (8, "Woody Savannas"),
    (9, "Savannas"),
    (10, "Grasslands"),
    (11, "Permanent Wetlands"),
    (12, "Croplands"),
    (13, "Urban and Built-up Lands"),
    (14, "Cropland/Natural Vegetation Mosaics"),
    (15, "Permanent Snow and Ice"),
    (16, "Barren"),
    (17, "Water Bodies"),
];

/// Look up the IGBP class name for a class code
pub fn igbp_class_name(code: i32) -> Option<&'static str> {
    IGBP_CLASSES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// How a band's values must be treated when resampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandKind {
    /// Reflectance, index and other continuous quantities
    Continuous,
    /// Discrete class codes
    Categorical,
}

/// A single named band of a raster
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub kind: BandKind,
    pub data: BandData,
}

impl Band {
    pub fn continuous(name: impl Into<String>, data: BandData) -> Self {
        Self {
            name: name.into(),
            kind: BandKind::Continuous,
            data,
        }
    }

    pub fn categorical(name: impl Into<String>, data: BandData) -> Self {
        Self {
            name: name.into(),
            kind: BandKind::Categorical,
            data,
        }
    }

    /// Number of unmasked pixels
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Geospatial transformation parameters (GDAL coefficient layout)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up grid with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self {
            top_left_x: coefficients[0],
            pixel_width: coefficients[1],
            rotation_x: coefficients[2],
            top_left_y: coefficients[3],
            rotation_y: coefficients[4],
            pixel_height: coefficients[5],
        }
    }

    /// Ground sample distance as (x, y), always positive
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (col, row) position of a map coordinate. Rotation terms are ignored.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }

    /// Rows and columns of every pixel an extent touches, in this grid's CRS.
    ///
    /// Not clamped to any grid size. Edges lying on a pixel boundary do not
    /// pull in the neighbouring pixel.
    pub fn window(&self, extent: &GeoExtent) -> (Range<i64>, Range<i64>) {
        let (c0, r0) = self.to_pixel(extent.min_x(), extent.max_y());
        let (c1, r1) = self.to_pixel(extent.max_x(), extent.min_y());
        let span = |a: f64, b: f64| {
            let (lo, hi) = (a.min(b), a.max(b));
            let start = (lo + EDGE_TOLERANCE).floor() as i64;
            let end = ((hi - EDGE_TOLERANCE).ceil() as i64).max(start + 1);
            start..end
        };
        (span(r0, r1), span(c0, c1))
    }

    /// Transform of the sub-grid starting at (row, col)
    pub fn offset(&self, row: usize, col: usize) -> Self {
        Self {
            top_left_x: self.top_left_x + col as f64 * self.pixel_width,
            top_left_y: self.top_left_y + row as f64 * self.pixel_height,
            ..*self
        }
    }
}

/// A multi-band 2-D grid with CRS, geotransform and optional year tag.
///
/// Always carries at least one band; the absence of data is expressed
/// with [`Layer::Empty`] instead of a zero-band raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    bands: Vec<Band>,
    crs: Crs,
    transform: GeoTransform,
    year: Option<YearTag>,
    timestamp: Option<DateTime<Utc>>,
}

impl Raster {
    /// Create a raster, rejecting zero bands, duplicate names and shape mismatches
    pub fn new(bands: Vec<Band>, crs: Crs, transform: GeoTransform) -> StackResult<Self> {
        let first = bands.first().ok_or_else(|| {
            StackError::SchemaMismatch("a raster needs at least one band".to_string())
        })?;
        let dim = first.data.dim();
        if dim.0 == 0 || dim.1 == 0 {
            return Err(StackError::SchemaMismatch(format!(
                "band '{}' has an empty {}x{} grid",
                first.name, dim.0, dim.1
            )));
        }

        let mut seen = HashSet::new();
        for band in &bands {
            if !seen.insert(band.name.as_str()) {
                return Err(StackError::SchemaMismatch(format!(
                    "duplicate band name '{}'",
                    band.name
                )));
            }
            if band.data.dim() != dim {
                return Err(StackError::SchemaMismatch(format!(
                    "band '{}' is {:?}, expected {:?}",
                    band.name,
                    band.data.dim(),
                    dim
                )));
            }
        }

        Ok(Self {
            bands,
            crs,
            transform,
            year: None,
            timestamp: None,
        })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn into_bands(self) -> Vec<Band> {
        self.bands
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.bands.iter().position(|b| b.name == name)
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.band(name).is_some()
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Grid shape as (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.bands[0].data.dim()
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }

    pub fn year(&self) -> Option<YearTag> {
        self.year
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Attach a year tag and its interval start timestamp
    pub fn with_year(mut self, year: YearTag, timestamp: DateTime<Utc>) -> Self {
        self.year = Some(year);
        self.timestamp = Some(timestamp);
        self
    }

    /// Copy year tag and timestamp from another raster
    pub fn with_tags_of(mut self, other: &Raster) -> Self {
        self.year = other.year;
        self.timestamp = other.timestamp;
        self
    }

    /// Bounding rectangle of the raster in its own CRS
    pub fn footprint(&self) -> StackResult<GeoExtent> {
        let (rows, cols) = self.dim();
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + rows as f64 * t.pixel_height;
        GeoExtent::new(self.crs, x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Whether both rasters share CRS, geotransform and shape
    pub fn same_grid(&self, other: &Raster) -> bool {
        self.crs == other.crs && self.transform == other.transform && self.dim() == other.dim()
    }

    /// Append a band, keeping band names unique
    pub fn with_band(mut self, band: Band) -> StackResult<Self> {
        if self.has_band(&band.name) {
            return Err(StackError::SchemaMismatch(format!(
                "band '{}' already present",
                band.name
            )));
        }
        if band.data.dim() != self.dim() {
            return Err(StackError::SchemaMismatch(format!(
                "band '{}' is {:?}, raster is {:?}",
                band.name,
                band.data.dim(),
                self.dim()
            )));
        }
        self.bands.push(band);
        Ok(self)
    }

    /// New raster with the named bands, in the requested order
    pub fn select(&self, names: &[&str]) -> StackResult<Self> {
        let bands = names
            .iter()
            .map(|name| {
                self.band(name).cloned().ok_or_else(|| {
                    StackError::SchemaMismatch(format!("band '{}' not found", name))
                })
            })
            .collect::<StackResult<Vec<_>>>()?;
        Ok(Raster::new(bands, self.crs, self.transform)?.with_tags_of(self))
    }

    /// New raster with one band renamed
    pub fn rename(&self, from: &str, to: &str) -> StackResult<Self> {
        let index = self
            .band_index(from)
            .ok_or_else(|| StackError::SchemaMismatch(format!("band '{}' not found", from)))?;
        let mut bands = self.bands.clone();
        bands[index].name = to.to_string();
        Ok(Raster::new(bands, self.crs, self.transform)?.with_tags_of(self))
    }

    /// Value of a band at a map coordinate in the raster's CRS; `None` when outside or masked
    pub fn value_at(&self, band_index: usize, x: f64, y: f64) -> Option<f32> {
        let band = self.bands.get(band_index)?;
        let (col, row) = self.transform.to_pixel(x, y);
        if !(col >= 0.0 && row >= 0.0) {
            return None;
        }
        let (rows, cols) = self.dim();
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        if row >= rows || col >= cols {
            return None;
        }
        let value = band.data[[row, col]];
        (!value.is_nan()).then_some(value)
    }

    /// Restrict to the window of every pixel the extent touches, even partly.
    ///
    /// Returns `Ok(None)` when the extent does not overlap the raster.
    pub fn clip(&self, extent: &GeoExtent) -> StackResult<Option<Self>> {
        let extent = extent.to_crs(self.crs)?;
        let (rows, cols) = self.dim();
        let (row_window, col_window) = self.transform.window(&extent);

        let clamp = |w: Range<i64>, n: usize| {
            (w.start.clamp(0, n as i64) as usize, w.end.clamp(0, n as i64) as usize)
        };
        let (row_start, row_end) = clamp(row_window, rows);
        let (col_start, col_end) = clamp(col_window, cols);
        if row_start >= row_end || col_start >= col_end {
            return Ok(None);
        }

        if row_start == 0 && col_start == 0 && row_end == rows && col_end == cols {
            return Ok(Some(self.clone()));
        }

        let bands = self
            .bands
            .iter()
            .map(|b| Band {
                name: b.name.clone(),
                kind: b.kind,
                data: b.data.slice(s![row_start..row_end, col_start..col_end]).to_owned(),
            })
            .collect();
        let transform = self.transform.offset(row_start, col_start);
        Ok(Some(Raster::new(bands, self.crs, transform)?.with_tags_of(self)))
    }
}

/// Result of a raster-producing stage: a raster, or the empty sentinel
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Present(Raster),
    Empty,
}

impl Layer {
    pub fn is_empty(&self) -> bool {
        matches!(self, Layer::Empty)
    }

    /// Band count, zero for `Empty`
    pub fn band_count(&self) -> usize {
        match self {
            Layer::Present(raster) => raster.band_count(),
            Layer::Empty => 0,
        }
    }

    pub fn as_raster(&self) -> Option<&Raster> {
        match self {
            Layer::Present(raster) => Some(raster),
            Layer::Empty => None,
        }
    }

    pub fn into_raster(self) -> Option<Raster> {
        match self {
            Layer::Present(raster) => Some(raster),
            Layer::Empty => None,
        }
    }

    /// Run a fallible stage on a present raster; `Empty` passes through untouched
    pub fn and_then<F>(self, stage: F) -> StackResult<Layer>
    where
        F: FnOnce(Raster) -> StackResult<Layer>,
    {
        match self {
            Layer::Present(raster) => stage(raster),
            Layer::Empty => Ok(Layer::Empty),
        }
    }
}

impl From<Raster> for Layer {
    fn from(raster: Raster) -> Self {
        Layer::Present(raster)
    }
}

impl From<Option<Raster>> for Layer {
    fn from(raster: Option<Raster>) -> Self {
        raster.map_or(Layer::Empty, Layer::Present)
    }
}

/// A raster stamped with its acquisition time and originating sensor
#[derive(Debug, Clone, PartialEq)]
pub struct TimedRaster {
    pub timestamp: DateTime<Utc>,
    pub sensor: String,
    pub raster: Raster,
}

/// A raw, sensor-native scene
pub type Scene = TimedRaster;

/// Rasters ordered by ascending timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterCollection {
    items: Vec<TimedRaster>,
}

/// Raw scenes before normalization
pub type SceneCollection = RasterCollection;

impl RasterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from unordered items; equal timestamps keep their input order
    pub fn from_vec(mut items: Vec<TimedRaster>) -> Self {
        items.sort_by_key(|item| item.timestamp);
        Self { items }
    }

    /// Insert after every item with a timestamp <= the new one
    pub fn push(&mut self, item: TimedRaster) {
        let index = self.items.partition_point(|i| i.timestamp <= item.timestamp);
        self.items.insert(index, item);
    }

    /// Merge two collections, keeping ascending timestamp order
    pub fn merge(mut self, other: RasterCollection) -> Self {
        for item in other.items {
            self.push(item);
        }
        self
    }

    /// Items acquired inside the interval, order kept
    pub fn filter_interval(&self, interval: &YearInterval) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|item| interval.contains(&item.timestamp))
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimedRaster> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<TimedRaster> {
        self.items
    }
}

impl<'a> IntoIterator for &'a RasterCollection {
    type Item = &'a TimedRaster;
    type IntoIter = std::slice::Iter<'a, TimedRaster>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Single categorical band of land-cover codes named [`CLASS_BAND`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClassRaster {
    raster: Raster,
}

impl ClassRaster {
    /// Validate and clean a single-band classification raster.
    ///
    /// Codes outside `classes` (fill values, non-integers) become masked.
    pub fn from_raster(raster: Raster, classes: RangeInclusive<i32>) -> StackResult<Self> {
        if raster.band_count() != 1 {
            return Err(StackError::SchemaMismatch(format!(
                "classification raster must have one band, found {}",
                raster.band_count()
            )));
        }

        let (lo, hi) = (*classes.start() as f32, *classes.end() as f32);
        let band = &raster.bands()[0];
        let cleaned = band.data.mapv(|v| {
            if v.fract() == 0.0 && v >= lo && v <= hi {
                v
            } else {
                f32::NAN
            }
        });

        let masked = cleaned.iter().filter(|v| v.is_nan()).count()
            - band.data.iter().filter(|v| v.is_nan()).count();
        if masked > 0 {
            log::debug!(
                "Masked {} classification pixels outside {}..={}",
                masked,
                classes.start(),
                classes.end()
            );
        }

        let cleaned = Raster::new(
            vec![Band::categorical(CLASS_BAND, cleaned)],
            raster.crs(),
            *raster.transform(),
        )?
        .with_tags_of(&raster);
        Ok(Self { raster: cleaned })
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn into_raster(self) -> Raster {
        self.raster
    }

    pub fn band(&self) -> &Band {
        &self.raster.bands()[0]
    }

    pub fn year(&self) -> Option<YearTag> {
        self.raster.year()
    }

    /// Distinct class codes present in the raster
    pub fn classes(&self) -> BTreeSet<i32> {
        self.band()
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| v as i32)
            .collect()
    }
}

/// Error types for the land-cover stack pipeline
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("Data unavailable for {year}: {reason}")]
    DataUnavailable { year: YearTag, reason: String },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Resource limit exceeded: {required} pixels requested, limit is {limit}")]
    ResourceLimitExceeded { required: u64, limit: u64 },

    #[error("Invalid extent: {0}")]
    InvalidExtent(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for pipeline operations
pub type StackResult<T> = Result<T, StackError>;
