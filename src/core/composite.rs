use ndarray::{Array2, ArrayView2, ArrayView3, Axis, Zip};
use num_traits::Float;
use std::cmp::Ordering;

use super::year_index::YearInterval;
use crate::types::{Band, Layer, Raster, RasterCollection, StackError, StackResult};

/// Median of a slice, reordering it in place. `None` for an empty slice.
///
/// An even count yields the mean of the two middle values.
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}

/// Per-pixel median of the non-NaN values across layers; all-NaN pixels stay NaN
pub fn nan_median_stack(layers: &[ArrayView2<f32>], dim: (usize, usize)) -> Array2<f32> {
    let mut output = Array2::from_elem(dim, f32::NAN);
    median_into(&mut output, layers);
    output
}

/// Per-pixel median over axis 0 of a (scenes, rows, cols) cube.
///
/// A cube without scenes has no composite, unlike a stack of fully masked scenes.
pub fn nan_median_cube(stack: ArrayView3<f32>) -> StackResult<Array2<f32>> {
    let (scenes, rows, cols) = stack.dim();
    if scenes == 0 {
        return Err(StackError::SchemaMismatch(
            "median of an empty scene stack is undefined".to_string(),
        ));
    }
    let layers: Vec<ArrayView2<f32>> = stack.axis_iter(Axis(0)).collect();
    Ok(nan_median_stack(&layers, (rows, cols)))
}

#[cfg(feature = "parallel")]
fn median_into(output: &mut Array2<f32>, layers: &[ArrayView2<f32>]) {
    Zip::indexed(output).par_for_each(|(i, j), out| {
        *out = pixel_median(layers, i, j);
    });
}

#[cfg(not(feature = "parallel"))]
fn median_into(output: &mut Array2<f32>, layers: &[ArrayView2<f32>]) {
    Zip::indexed(output).for_each(|(i, j), out| {
        *out = pixel_median(layers, i, j);
    });
}

fn pixel_median(layers: &[ArrayView2<f32>], i: usize, j: usize) -> f32 {
    let mut values: Vec<f32> = layers
        .iter()
        .map(|layer| layer[[i, j]])
        .filter(|v| !v.is_nan())
        .collect();
    median(&mut values).unwrap_or(f32::NAN)
}

/// Temporal median compositor over normalized, masked scenes
#[derive(Debug, Default, Clone)]
pub struct Compositor;

impl Compositor {
    pub fn new() -> Self {
        Self
    }

    /// Reduce a collection to one per-pixel, per-band median raster.
    ///
    /// An empty collection yields `Layer::Empty` without touching any pixel.
    pub fn median(&self, scenes: &RasterCollection) -> StackResult<Layer> {
        let reference = match scenes.iter().next() {
            Some(first) => &first.raster,
            None => {
                log::info!("No scenes to composite, producing an empty layer");
                return Ok(Layer::Empty);
            }
        };

        for scene in scenes {
            if !scene.raster.same_grid(reference) {
                return Err(StackError::SchemaMismatch(format!(
                    "scene from {} at {} is not on the composite grid",
                    scene.sensor, scene.timestamp
                )));
            }
            if scene.raster.band_names() != reference.band_names() {
                return Err(StackError::SchemaMismatch(format!(
                    "scene from {} at {} has bands {:?}, expected {:?}",
                    scene.sensor,
                    scene.timestamp,
                    scene.raster.band_names(),
                    reference.band_names()
                )));
            }
        }

        log::info!(
            "Compositing {} scenes, {} bands of {:?}",
            scenes.len(),
            reference.band_count(),
            reference.dim()
        );

        let dim = reference.dim();
        let bands = reference
            .bands()
            .iter()
            .enumerate()
            .map(|(index, template)| {
                let layers: Vec<ArrayView2<f32>> = scenes
                    .iter()
                    .map(|scene| scene.raster.bands()[index].data.view())
                    .collect();
                let data = nan_median_stack(&layers, dim);
                log::debug!(
                    "Band '{}': {} of {} pixels valid after compositing",
                    template.name,
                    data.iter().filter(|v| !v.is_nan()).count(),
                    data.len()
                );
                Band {
                    name: template.name.clone(),
                    kind: template.kind,
                    data,
                }
            })
            .collect();

        Ok(Layer::Present(Raster::new(bands, reference.crs(), *reference.transform())?))
    }

    /// Composite the scenes of one year, tagging the result with the year and its start
    pub fn composite_year(
        &self,
        scenes: &RasterCollection,
        interval: &YearInterval,
    ) -> StackResult<Layer> {
        self.median(scenes)?.and_then(|raster| {
            Ok(Layer::Present(
                raster.with_year(interval.year(), interval.start_timestamp()),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::Crs;
    use crate::types::{GeoTransform, TimedRaster};
    use chrono::{TimeZone, Utc};

    fn scene(day: u32, values: Vec<f32>) -> TimedRaster {
        let data = Array2::from_shape_vec((1, values.len()), values).unwrap();
        TimedRaster {
            timestamp: Utc.with_ymd_and_hms(2020, 6, day, 0, 0, 0).unwrap(),
            sensor: "LC08".to_string(),
            raster: Raster::new(
                vec![Band::continuous("red", data)],
                Crs::WebMercator,
                GeoTransform::north_up(0.0, 30.0, 30.0),
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_median_helper() {
        assert_eq!(median::<f32>(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_cube_median_needs_scenes() {
        let empty = ndarray::Array3::<f32>::zeros((0, 2, 2));
        assert!(matches!(
            nan_median_cube(empty.view()),
            Err(StackError::SchemaMismatch(_))
        ));

        let cube = ndarray::Array3::from_shape_vec(
            (3, 1, 2),
            vec![0.1, f32::NAN, 0.5, f32::NAN, 0.3, f32::NAN],
        )
        .unwrap();
        let median = nan_median_cube(cube.view()).unwrap();
        assert_eq!(median[[0, 0]], 0.3);
        assert!(median[[0, 1]].is_nan());
    }

    #[test]
    fn test_empty_collection_short_circuits() {
        let layer = Compositor::new().median(&RasterCollection::new()).unwrap();
        assert!(layer.is_empty());
        assert_eq!(layer.band_count(), 0);
    }

    #[test]
    fn test_single_scene_is_unchanged() {
        let values = vec![0.1, f32::NAN, 0.3];
        let collection = RasterCollection::from_vec(vec![scene(1, values.clone())]);
        let layer = Compositor::new().median(&collection).unwrap();
        let data = &layer.as_raster().unwrap().bands()[0].data;

        assert_eq!(data[[0, 0]], 0.1);
        assert!(data[[0, 1]].is_nan());
        assert_eq!(data[[0, 2]], 0.3);
    }

    #[test]
    fn test_median_ignores_masked_values() {
        let collection = RasterCollection::from_vec(vec![
            scene(1, vec![0.1, f32::NAN, f32::NAN]),
            scene(2, vec![0.5, 0.2, f32::NAN]),
            scene(3, vec![0.3, 0.4, f32::NAN]),
        ]);
        let layer = Compositor::new().median(&collection).unwrap();
        let data = &layer.as_raster().unwrap().bands()[0].data;

        assert_eq!(data[[0, 0]], 0.3);
        assert!((data[[0, 1]] - 0.3).abs() < 1e-6);
        assert!(data[[0, 2]].is_nan());
    }

    #[test]
    fn test_median_is_order_independent() {
        let a = scene(1, vec![0.9, 0.1]);
        let b = scene(2, vec![0.2, 0.7]);
        let c = scene(3, vec![0.4, 0.3]);
        let forward = RasterCollection::from_vec(vec![a.clone(), b.clone(), c.clone()]);
        let mut shuffled = vec![c, a, b];
        for (day, item) in shuffled.iter_mut().enumerate() {
            item.timestamp = Utc.with_ymd_and_hms(2020, 7, day as u32 + 1, 0, 0, 0).unwrap();
        }
        let backward = RasterCollection::from_vec(shuffled);

        let compositor = Compositor::new();
        assert_eq!(
            compositor.median(&forward).unwrap(),
            compositor.median(&backward).unwrap()
        );
    }

    #[test]
    fn test_mismatched_bands_rejected() {
        let mut other = scene(2, vec![0.1]);
        other.raster = other.raster.rename("red", "nir").unwrap();
        let collection = RasterCollection::from_vec(vec![scene(1, vec![0.1]), other]);
        assert!(matches!(
            Compositor::new().median(&collection),
            Err(StackError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_year_tagging() {
        let interval = YearInterval::for_year(2020).unwrap();
        let collection = RasterCollection::from_vec(vec![scene(1, vec![0.1])]);
        let layer = Compositor::new().composite_year(&collection, &interval).unwrap();
        let raster = layer.as_raster().unwrap();
        assert_eq!(raster.year(), Some(2020));
        assert_eq!(raster.timestamp(), Some(interval.start_timestamp()));
    }
}
