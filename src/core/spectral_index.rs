use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::types::{Band, Layer, Raster, StackResult};

/// Names of the two input bands and the output of a normalized difference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub band_a: String,
    pub band_b: String,
    pub output: String,
}

impl IndexConfig {
    /// NDVI: (nir - red) / (nir + red)
    pub fn ndvi() -> Self {
        Self {
            band_a: "nir".to_string(),
            band_b: "red".to_string(),
            output: "ndvi".to_string(),
        }
    }
}

/// `(a - b) / (a + b)` clamped to [-1, 1]; NaN where the sum is zero or an input is masked
pub fn normalized_difference_value(a: f32, b: f32) -> f32 {
    let sum = a + b;
    if sum == 0.0 || sum.is_nan() {
        return f32::NAN;
    }
    ((a - b) / sum).clamp(-1.0, 1.0)
}

pub fn normalized_difference(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Array2<f32> {
    Zip::from(a)
        .and(b)
        .map_collect(|&a, &b| normalized_difference_value(a, b))
}

/// Appends a normalized-difference band when both input bands exist
#[derive(Debug, Clone)]
pub struct IndexCalculator {
    config: IndexConfig,
}

impl IndexCalculator {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    pub fn ndvi() -> Self {
        Self::new(IndexConfig::ndvi())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn apply(&self, layer: Layer) -> StackResult<Layer> {
        layer.and_then(|raster| Ok(Layer::Present(self.apply_raster(raster)?)))
    }

    /// Return the raster with the index band appended, or unchanged when an
    /// input band is missing or the output band already exists
    pub fn apply_raster(&self, raster: Raster) -> StackResult<Raster> {
        let IndexConfig { band_a, band_b, output } = &self.config;

        if raster.has_band(output) {
            log::debug!("Band '{}' already present, leaving raster unchanged", output);
            return Ok(raster);
        }
        let (a, b) = match (raster.band(band_a), raster.band(band_b)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                log::debug!(
                    "Skipping '{}': needs '{}' and '{}', raster has {:?}",
                    output,
                    band_a,
                    band_b,
                    raster.band_names()
                );
                return Ok(raster);
            }
        };

        let data = normalized_difference(a.data.view(), b.data.view());
        raster.with_band(Band::continuous(output.clone(), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::Crs;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;

    fn raster(bands: &[(&str, Vec<f32>)]) -> Raster {
        let bands = bands
            .iter()
            .map(|(name, values)| {
                Band::continuous(
                    *name,
                    Array2::from_shape_vec((1, values.len()), values.clone()).unwrap(),
                )
            })
            .collect();
        Raster::new(bands, Crs::WebMercator, GeoTransform::north_up(0.0, 30.0, 30.0)).unwrap()
    }

    #[test]
    fn test_ndvi_appended() {
        let input = raster(&[
            ("red", vec![0.1, 0.0, 0.2, f32::NAN]),
            ("nir", vec![0.5, 0.0, 0.2, 0.4]),
        ]);
        let output = IndexCalculator::ndvi().apply_raster(input).unwrap();
        let ndvi = &output.band("ndvi").unwrap().data;

        assert_eq!(output.band_names(), vec!["red", "nir", "ndvi"]);
        assert_abs_diff_eq!(ndvi[[0, 0]], 0.4 / 0.6, epsilon = 1e-6);
        assert!(ndvi[[0, 1]].is_nan());
        assert_eq!(ndvi[[0, 2]], 0.0);
        assert!(ndvi[[0, 3]].is_nan());
    }

    #[test]
    fn test_missing_band_returns_input_unchanged() {
        let input = raster(&[
            ("blue", vec![0.1]),
            ("green", vec![0.2]),
            ("red", vec![0.3]),
        ]);
        let calculator = IndexCalculator::ndvi();
        let once = calculator.apply_raster(input.clone()).unwrap();
        let twice = calculator.apply_raster(once.clone()).unwrap();

        assert_eq!(once, input);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_apply_is_idempotent_when_bands_present() {
        let input = raster(&[("red", vec![0.1]), ("nir", vec![0.3])]);
        let calculator = IndexCalculator::ndvi();
        let once = calculator.apply(Layer::Present(input)).unwrap();
        let twice = calculator.apply(once.clone()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.band_count(), 3);
    }

    #[test]
    fn test_empty_layer_passes_through() {
        assert!(IndexCalculator::ndvi().apply(Layer::Empty).unwrap().is_empty());
    }

    #[test]
    fn test_value_is_clamped() {
        assert_eq!(normalized_difference_value(1.0, -0.5), 1.0);
        assert_eq!(normalized_difference_value(-0.5, 1.0), -1.0);
    }
}
