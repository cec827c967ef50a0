use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use super::extent::GeoExtent;
use crate::types::{ClassRaster, Raster, StackError, StackResult};

/// Default pixel budget of one reduction
pub const DEFAULT_MAX_PIXELS: u64 = 10_000_000;

/// Class code -> pixel count; classes with no pixels are absent
pub type Histogram = BTreeMap<i32, u64>;

/// Reducer name -> value; `None` when every sampled pixel was masked
pub type Statistics = BTreeMap<String, Option<f64>>;

/// (from class, to class) -> pixel count
pub type TransitionMatrix = BTreeMap<(i32, i32), u64>;

/// Named scalar reducers for statistics mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Mean,
    Min,
    Max,
    Count,
    Sum,
    StdDev,
}

impl Reducer {
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Count => "count",
            Reducer::Sum => "sum",
            Reducer::StdDev => "std_dev",
        }
    }
}

impl std::str::FromStr for Reducer {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(Reducer::Mean),
            "min" => Ok(Reducer::Min),
            "max" => Ok(Reducer::Max),
            "count" => Ok(Reducer::Count),
            "sum" => Ok(Reducer::Sum),
            "std_dev" | "stddev" => Ok(Reducer::StdDev),
            _ => Err(StackError::InvalidConfig(format!("unknown reducer '{}'", s))),
        }
    }
}

/// Single-pass accumulator behind statistics mode (Welford's update)
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    mean: f64,
    m2: f64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn result(&self, reducer: Reducer) -> Option<f64> {
        if reducer == Reducer::Count {
            return Some(self.count as f64);
        }
        if self.count == 0 {
            return None;
        }
        Some(match reducer {
            Reducer::Mean => self.mean,
            Reducer::Min => self.min,
            Reducer::Max => self.max,
            Reducer::Sum => self.sum,
            Reducer::StdDev => (self.m2 / self.count as f64).max(0.0).sqrt(),
            Reducer::Count => self.count as f64,
        })
    }
}

/// Histogram and statistics over a region, sampled at a caller-chosen scale
#[derive(Debug, Clone)]
pub struct ZonalReducer {
    max_pixels: u64,
}

impl Default for ZonalReducer {
    fn default() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl ZonalReducer {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    /// Count unmasked pixels per discrete value of `band` inside `extent`
    pub fn histogram(
        &self,
        raster: &Raster,
        band: &str,
        extent: &GeoExtent,
        scale: f64,
    ) -> StackResult<Histogram> {
        let mut histogram = Histogram::new();
        let mut non_discrete = None;
        self.visit(raster, band, extent, scale, |value| {
            if value.fract() != 0.0 {
                non_discrete.get_or_insert(value);
                return;
            }
            *histogram.entry(value as i32).or_insert(0) += 1;
        })?;

        if let Some(value) = non_discrete {
            return Err(StackError::SchemaMismatch(format!(
                "band '{}' is not discrete: found value {}",
                band, value
            )));
        }
        log::debug!("Histogram of '{}': {:?}", band, histogram);
        Ok(histogram)
    }

    /// Compute the requested reducers over unmasked pixels in one pass
    pub fn statistics(
        &self,
        raster: &Raster,
        band: &str,
        extent: &GeoExtent,
        scale: f64,
        reducers: &[Reducer],
    ) -> StackResult<Statistics> {
        let mut accumulator = Accumulator::default();
        self.visit(raster, band, extent, scale, |value| accumulator.push(value as f64))?;

        Ok(reducers
            .iter()
            .map(|r| (r.name().to_string(), accumulator.result(*r)))
            .collect())
    }

    /// Number of sample cells of size `scale` needed to cover the extent
    pub fn sample_count(extent: &GeoExtent, scale: f64) -> StackResult<(u64, u64)> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(StackError::InvalidConfig(format!(
                "zonal scale must be positive, got {}",
                scale
            )));
        }
        let cols = (extent.width() / scale - 1e-9).ceil().max(1.0);
        let rows = (extent.height() / scale - 1e-9).ceil().max(1.0);
        Ok((rows as u64, cols as u64))
    }

    /// Sample the band at every cell centre of a `scale` grid over the extent,
    /// passing unmasked values to `visit`
    fn visit<F>(
        &self,
        raster: &Raster,
        band: &str,
        extent: &GeoExtent,
        scale: f64,
        mut visit: F,
    ) -> StackResult<()>
    where
        F: FnMut(f32),
    {
        let band_index = raster.band_index(band).ok_or_else(|| {
            StackError::SchemaMismatch(format!(
                "band '{}' not found, raster has {:?}",
                band,
                raster.band_names()
            ))
        })?;

        let (rows, cols) = Self::sample_count(extent, scale)?;
        let required = rows.saturating_mul(cols);
        if required > self.max_pixels {
            return Err(StackError::ResourceLimitExceeded {
                required,
                limit: self.max_pixels,
            });
        }

        let to_raster = extent.crs().transformer_to(raster.crs())?;
        let mut visited = 0u64;
        for row in 0..rows {
            let y = extent.max_y() - (row as f64 + 0.5) * scale;
            for col in 0..cols {
                let x = extent.min_x() + (col as f64 + 0.5) * scale;
                if !extent.contains(x, y) {
                    continue;
                }
                let Some((rx, ry)) = to_raster.transform(x, y) else {
                    continue;
                };
                if let Some(value) = raster.value_at(band_index, rx, ry) {
                    visited += 1;
                    visit(value);
                }
            }
        }
        log::debug!(
            "Zonal pass over '{}': {} of {} sample cells unmasked",
            band,
            visited,
            required
        );
        Ok(())
    }
}

/// Histogram with the default pixel budget
pub fn zonal_histogram(
    raster: &Raster,
    band: &str,
    extent: &GeoExtent,
    scale: f64,
) -> StackResult<Histogram> {
    ZonalReducer::default().histogram(raster, band, extent, scale)
}

/// Statistics with the default pixel budget
pub fn zonal_stats(
    raster: &Raster,
    band: &str,
    extent: &GeoExtent,
    scale: f64,
    reducers: &[Reducer],
) -> StackResult<Statistics> {
    ZonalReducer::default().statistics(raster, band, extent, scale, reducers)
}

/// Fill every class of `classes` absent from the histogram with an explicit zero
pub fn dense_histogram(histogram: &Histogram, classes: RangeInclusive<i32>) -> Histogram {
    let mut dense: Histogram = classes.map(|class| (class, 0)).collect();
    for (&class, &count) in histogram {
        dense.insert(class, count);
    }
    dense
}

/// Pixel-for-pixel class transitions between two classification rasters on one grid
pub fn class_transitions(from: &ClassRaster, to: &ClassRaster) -> StackResult<TransitionMatrix> {
    if !from.raster().same_grid(to.raster()) {
        return Err(StackError::SchemaMismatch(
            "class transitions need both rasters on the same grid".to_string(),
        ));
    }
    let mut matrix = TransitionMatrix::new();
    for (&a, &b) in from.band().data.iter().zip(to.band().data.iter()) {
        if a.is_nan() || b.is_nan() {
            continue;
        }
        *matrix.entry((a as i32, b as i32)).or_insert(0) += 1;
    }
    Ok(matrix)
}
