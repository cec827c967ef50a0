use ndarray::Zip;

use super::quality_mask::QualityMask;
use crate::config::SensorConfig;
use crate::types::{
    Band, Raster, RasterCollection, SceneCollection, StackError, StackResult, TimedRaster,
};

/// Masks raw scenes, renames sensor bands to canonical names and rescales reflectance
pub struct SceneNormalizer<'a> {
    sensor: &'a SensorConfig,
}

impl<'a> SceneNormalizer<'a> {
    pub fn new(sensor: &'a SensorConfig) -> Self {
        Self { sensor }
    }

    /// Normalize one raw scene.
    ///
    /// Output holds only the canonical bands, values divided by the sensor
    /// scale, with pixels rejected by the quality mask set to NaN.
    pub fn normalize(&self, scene: &Raster) -> StackResult<Raster> {
        let sources = self
            .sensor
            .source_bands
            .iter()
            .map(|name| {
                scene.band(name).ok_or_else(|| {
                    StackError::SchemaMismatch(format!(
                        "{}: source band '{}' missing, scene has {:?}",
                        self.sensor.id,
                        name,
                        scene.band_names()
                    ))
                })
            })
            .collect::<StackResult<Vec<_>>>()?;

        let keep = QualityMask::new(self.sensor).compute(scene)?;
        let scale = self.sensor.scale;

        let bands = sources
            .into_iter()
            .zip(&self.sensor.canonical_bands)
            .map(|(source, canonical)| {
                let data = Zip::from(&source.data)
                    .and(&keep)
                    .map_collect(|&value, &keep| if keep { value / scale } else { f32::NAN });
                Band {
                    name: canonical.clone(),
                    kind: source.kind,
                    data,
                }
            })
            .collect();

        Ok(Raster::new(bands, scene.crs(), *scene.transform())?.with_tags_of(scene))
    }

    /// Normalize every scene of a collection, keeping timestamps and order
    pub fn normalize_collection(&self, scenes: &SceneCollection) -> StackResult<RasterCollection> {
        log::info!(
            "Normalizing {} {} scenes",
            scenes.len(),
            self.sensor.id
        );
        let normalized = scenes
            .iter()
            .map(|scene| {
                Ok(TimedRaster {
                    timestamp: scene.timestamp,
                    sensor: scene.sensor.clone(),
                    raster: self.normalize(&scene.raster)?,
                })
            })
            .collect::<StackResult<Vec<_>>>()?;
        Ok(RasterCollection::from_vec(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::Crs;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn raw_scene(sensor: &SensorConfig, qa: f32, value: f32) -> Raster {
        let mut bands = vec![Band::continuous(
            sensor.qa_band.clone(),
            Array2::from_elem((2, 2), qa),
        )];
        for (i, name) in sensor.source_bands.iter().enumerate() {
            bands.push(Band::continuous(
                name.clone(),
                Array2::from_elem((2, 2), value + i as f32),
            ));
        }
        Raster::new(
            bands,
            Crs::Utm { zone: 33, north: true },
            GeoTransform::north_up(0.0, 60.0, 30.0),
        )
        .unwrap()
    }

    #[test]
    fn test_renames_and_rescales() {
        let sensor = SensorConfig::landsat8();
        let normalized = SceneNormalizer::new(&sensor)
            .normalize(&raw_scene(&sensor, 0.0, 2000.0))
            .unwrap();

        assert_eq!(
            normalized.band_names(),
            vec!["blue", "green", "red", "nir", "swir1", "swir2"]
        );
        assert_abs_diff_eq!(normalized.band("blue").unwrap().data[[0, 0]], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(normalized.band("green").unwrap().data[[1, 1]], 0.2001, epsilon = 1e-6);
        assert!(!normalized.has_band("QA_PIXEL"));
    }

    #[test]
    fn test_masked_pixels_stay_masked() {
        let sensor = SensorConfig::landsat7();
        let cloud = (1 << sensor.qa_bits.cloud) as f32;
        let normalized = SceneNormalizer::new(&sensor)
            .normalize(&raw_scene(&sensor, cloud, 2000.0))
            .unwrap();
        assert!(normalized.bands().iter().all(|b| b.valid_count() == 0));
    }

    #[test]
    fn test_missing_source_band() {
        let sensor = SensorConfig::landsat8();
        let mut other = sensor.clone();
        other.source_bands[3] = "SR_B9".to_string();

        let result = SceneNormalizer::new(&other).normalize(&raw_scene(&sensor, 0.0, 2000.0));
        assert!(matches!(result, Err(StackError::SchemaMismatch(_))));
    }
}
