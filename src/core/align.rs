use ndarray::Array2;
use std::collections::BTreeMap;

use super::projection::{CoordTransformer, Crs};
use crate::types::{
    Band, BandKind, ClassRaster, GeoTransform, Layer, Raster, StackError, StackResult,
};

/// Upper bound on sub-samples per axis inside one target pixel
const DEFAULT_MAX_OVERSAMPLE: usize = 16;

/// Resampling kernel, chosen per band from its kind and the scale change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    /// Mean of the source values covered by the target cell
    Mean,
    /// Bilinear interpolation at the target cell centre
    Bilinear,
    /// Most frequent class code in the target cell, ties to the smallest code
    Mode,
    /// Source pixel under the target cell centre
    Nearest,
}

impl Resampling {
    /// Continuous bands are averaged or interpolated, categorical bands keep exact codes
    pub fn for_band(kind: BandKind, downsampling: bool) -> Self {
        match (kind, downsampling) {
            (BandKind::Continuous, true) => Resampling::Mean,
            (BandKind::Continuous, false) => Resampling::Bilinear,
            (BandKind::Categorical, true) => Resampling::Mode,
            (BandKind::Categorical, false) => Resampling::Nearest,
        }
    }
}

/// Source-grid sample positions for one target pixel, as fractional (col, row)
#[derive(Debug, Clone, Default)]
struct SamplePlan {
    center: Option<(f64, f64)>,
    cell: Vec<(f64, f64)>,
}

/// Target grid description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGrid {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub dim: (usize, usize),
}

impl TargetGrid {
    pub fn of(raster: &Raster) -> Self {
        Self {
            crs: raster.crs(),
            transform: *raster.transform(),
            dim: raster.dim(),
        }
    }
}

/// Reprojects rasters onto a reference grid
#[derive(Debug, Clone)]
pub struct Aligner {
    max_oversample: usize,
}

impl Default for Aligner {
    fn default() -> Self {
        Self {
            max_oversample: DEFAULT_MAX_OVERSAMPLE,
        }
    }
}

impl Aligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_oversample(max_oversample: usize) -> Self {
        Self {
            max_oversample: max_oversample.max(1),
        }
    }

    /// Align a layer to the reference raster's grid; `Empty` is returned unchanged
    pub fn align(&self, source: Layer, reference: &Raster) -> StackResult<Layer> {
        source.and_then(|raster| Ok(Layer::Present(self.align_raster(&raster, reference)?)))
    }

    pub fn align_raster(&self, source: &Raster, reference: &Raster) -> StackResult<Raster> {
        self.align_to_grid(source, &TargetGrid::of(reference))
    }

    /// Align a classification raster; codes are carried over exactly
    pub fn align_classes(
        &self,
        source: &ClassRaster,
        reference: &Raster,
    ) -> StackResult<ClassRaster> {
        let aligned = self.align_raster(source.raster(), reference)?;
        ClassRaster::from_raster(aligned, i32::MIN..=i32::MAX)
    }

    pub fn align_to_grid(&self, source: &Raster, target: &TargetGrid) -> StackResult<Raster> {
        if source.crs() == target.crs
            && *source.transform() == target.transform
            && source.dim() == target.dim
        {
            return Ok(source.clone());
        }

        let to_source = target.crs.transformer_to(source.crs())?;
        let factor = self.oversample_factor(source, target, &to_source);
        log::info!(
            "Aligning {} bands from {} {:?} to {} {:?} ({}x{} samples per pixel)",
            source.band_count(),
            source.crs(),
            source.resolution(),
            target.crs,
            target.transform.resolution(),
            factor,
            factor
        );

        let plans = self.build_plans(source, target, &to_source, factor);
        let downsampling = factor > 1;

        let bands = source
            .bands()
            .iter()
            .map(|band| {
                let kernel = Resampling::for_band(band.kind, downsampling);
                log::debug!("Resampling band '{}' with {:?}", band.name, kernel);
                let values = resample_values(&band.data, &plans, kernel);
                let data = Array2::from_shape_vec(target.dim, values).map_err(|e| {
                    StackError::Processing(format!("Failed to shape aligned band: {}", e))
                })?;
                Ok(Band {
                    name: band.name.clone(),
                    kind: band.kind,
                    data,
                })
            })
            .collect::<StackResult<Vec<_>>>()?;

        Ok(Raster::new(bands, target.crs, target.transform)?.with_tags_of(source))
    }

    /// Number of sub-samples per axis so each covered source pixel is visited
    fn oversample_factor(
        &self,
        source: &Raster,
        target: &TargetGrid,
        to_source: &CoordTransformer,
    ) -> usize {
        let (rows, cols) = target.dim;
        let t = &target.transform;
        let (cx, cy) = t.pixel_center(rows / 2, cols / 2);
        let half_w = t.pixel_width / 2.0;
        let half_h = t.pixel_height / 2.0;

        let corners = [
            (cx - half_w, cy - half_h),
            (cx + half_w, cy - half_h),
            (cx - half_w, cy + half_h),
            (cx + half_w, cy + half_h),
        ];
        let projected: Vec<(f64, f64)> = corners
            .iter()
            .filter_map(|&(x, y)| to_source.transform(x, y))
            .collect();
        if projected.len() < corners.len() {
            log::warn!(
                "Target cell not representable in {}, sampling cell centres only",
                source.crs()
            );
            return 1;
        }

        let span = |axis: fn(&(f64, f64)) -> f64| {
            let values = projected.iter().map(axis);
            let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
            hi - lo
        };
        let (res_x, res_y) = source.resolution();
        let ratio = (span(|p| p.0) / res_x).max(span(|p| p.1) / res_y);
        if !ratio.is_finite() || ratio <= 1.0 {
            return 1;
        }
        (ratio.ceil() as usize).clamp(1, self.max_oversample)
    }

    fn build_plans(
        &self,
        source: &Raster,
        target: &TargetGrid,
        transformer: &CoordTransformer,
        factor: usize,
    ) -> Vec<SamplePlan> {
        let (rows, cols) = target.dim;
        let t = target.transform;
        let source_transform = *source.transform();

        let to_source = |x: f64, y: f64| {
            transformer
                .transform(x, y)
                .map(|(sx, sy)| source_transform.to_pixel(sx, sy))
        };

        (0..rows * cols)
            .map(|index| {
                let (row, col) = (index / cols, index % cols);
                let (cx, cy) = t.pixel_center(row, col);
                let mut plan = SamplePlan {
                    center: to_source(cx, cy),
                    cell: Vec::new(),
                };
                if factor > 1 {
                    plan.cell.reserve(factor * factor);
                    for sr in 0..factor {
                        for sc in 0..factor {
                            let fx = (sc as f64 + 0.5) / factor as f64;
                            let fy = (sr as f64 + 0.5) / factor as f64;
                            let x = t.top_left_x + (col as f64 + fx) * t.pixel_width;
                            let y = t.top_left_y + (row as f64 + fy) * t.pixel_height;
                            if let Some(position) = to_source(x, y) {
                                plan.cell.push(position);
                            }
                        }
                    }
                }
                plan
            })
            .collect()
    }
}

#[cfg(feature = "parallel")]
fn resample_values(data: &Array2<f32>, plans: &[SamplePlan], kernel: Resampling) -> Vec<f32> {
    use rayon::prelude::*;
    plans.par_iter().map(|plan| sample(data, plan, kernel)).collect()
}

#[cfg(not(feature = "parallel"))]
fn resample_values(data: &Array2<f32>, plans: &[SamplePlan], kernel: Resampling) -> Vec<f32> {
    plans.iter().map(|plan| sample(data, plan, kernel)).collect()
}

fn sample(data: &Array2<f32>, plan: &SamplePlan, kernel: Resampling) -> f32 {
    match kernel {
        Resampling::Mean => {
            let (sum, count) = plan
                .cell
                .iter()
                .filter_map(|&(c, r)| pixel(data, c, r))
                .fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
            if count == 0 {
                f32::NAN
            } else {
                (sum / count as f64) as f32
            }
        }
        Resampling::Mode => {
            let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
            for value in plan.cell.iter().filter_map(|&(c, r)| pixel(data, c, r)) {
                *counts.entry(value as i64).or_insert(0) += 1;
            }
            let mut best: Option<(i64, usize)> = None;
            for (code, count) in counts {
                if best.map_or(true, |(_, n)| count > n) {
                    best = Some((code, count));
                }
            }
            best.map_or(f32::NAN, |(code, _)| code as f32)
        }
        Resampling::Nearest => plan
            .center
            .and_then(|(c, r)| pixel(data, c, r))
            .unwrap_or(f32::NAN),
        Resampling::Bilinear => plan
            .center
            .map_or(f32::NAN, |(c, r)| bilinear(data, c, r)),
    }
}

/// Value of the source pixel containing fractional position (col, row)
fn pixel(data: &Array2<f32>, col: f64, row: f64) -> Option<f32> {
    if !(col >= 0.0 && row >= 0.0) {
        return None;
    }
    let (rows, cols) = data.dim();
    let (r, c) = (row.floor() as usize, col.floor() as usize);
    if r >= rows || c >= cols {
        return None;
    }
    let value = data[[r, c]];
    (!value.is_nan()).then_some(value)
}

/// Bilinear interpolation between pixel centres, renormalizing over unmasked neighbours
fn bilinear(data: &Array2<f32>, col: f64, row: f64) -> f32 {
    let (rows, cols) = data.dim();
    if pixel(data, col, row).is_none() {
        return f32::NAN;
    }

    let x = (col - 0.5).clamp(0.0, (cols - 1) as f64);
    let y = (row - 0.5).clamp(0.0, (rows - 1) as f64);
    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    let x2 = (x1 + 1).min(cols - 1);
    let y2 = (y1 + 1).min(rows - 1);
    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let neighbours = [
        (y1, x1, (1.0 - dx) * (1.0 - dy)),
        (y1, x2, dx * (1.0 - dy)),
        (y2, x1, (1.0 - dx) * dy),
        (y2, x2, dx * dy),
    ];
    let (sum, weight) = neighbours
        .iter()
        .filter(|&&(_, _, w)| w > 0.0)
        .filter_map(|&(r, c, w)| {
            let v = data[[r, c]];
            (!v.is_nan()).then_some((v as f64 * w, w))
        })
        .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v, tw + w));

    if weight > 0.0 {
        (sum / weight) as f32
    } else {
        f32::NAN
    }
}
