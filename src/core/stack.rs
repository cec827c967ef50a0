use crate::types::{ClassRaster, Layer, Raster, StackError, StackResult, CLASS_BAND};

/// Combines an aligned composite with its year's classification into a
/// training raster
#[derive(Debug, Default, Clone)]
pub struct StackAssembler;

impl StackAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Stack composite bands and the classification band.
    ///
    /// An empty composite yields `Layer::Empty`. The composite must already
    /// share the classification grid and must not carry a band named like
    /// the classification band. `ClassRaster` always holds exactly one band.
    pub fn assemble(&self, composite: Layer, classes: &ClassRaster) -> StackResult<Layer> {
        let composite = match composite {
            Layer::Present(raster) => raster,
            Layer::Empty => {
                log::info!(
                    "No composite for {:?}, training stack is empty",
                    classes.year()
                );
                return Ok(Layer::Empty);
            }
        };
        if let (Some(composite_year), Some(class_year)) = (composite.year(), classes.year()) {
            if composite_year != class_year {
                return Err(StackError::SchemaMismatch(format!(
                    "composite for {} paired with classification for {}",
                    composite_year, class_year
                )));
            }
        }
        if !composite.same_grid(classes.raster()) {
            return Err(StackError::SchemaMismatch(format!(
                "composite grid {} {:?} {:?} does not match classification grid {} {:?} {:?}",
                composite.crs(),
                composite.transform(),
                composite.dim(),
                classes.raster().crs(),
                classes.raster().transform(),
                classes.raster().dim()
            )));
        }
        if composite.has_band(CLASS_BAND) {
            return Err(StackError::SchemaMismatch(format!(
                "composite already has a band named '{}'",
                CLASS_BAND
            )));
        }

        let stacked = composite.with_band(classes.band().clone())?;
        log::info!(
            "Training stack for {:?}: bands {:?}",
            stacked.year(),
            stacked.band_names()
        );
        Ok(Layer::Present(stacked))
    }
}

/// Keep only results that carry bands, in input order
pub fn training_collection<I>(layers: I) -> Vec<Raster>
where
    I: IntoIterator<Item = Layer>,
{
    layers
        .into_iter()
        .filter(|layer| layer.band_count() > 0)
        .filter_map(Layer::into_raster)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::Crs;
    use crate::types::{Band, GeoTransform};
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn classes(year: i32) -> ClassRaster {
        let raster = Raster::new(
            vec![Band::categorical("LC_Type1", Array2::from_elem((2, 2), 12.0))],
            Crs::Sinusoidal,
            GeoTransform::north_up(0.0, 1000.0, 500.0),
        )
        .unwrap()
        .with_year(year, Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap());
        ClassRaster::from_raster(raster, 1..=17).unwrap()
    }

    fn composite(year: i32) -> Raster {
        Raster::new(
            vec![
                Band::continuous("red", Array2::from_elem((2, 2), 0.1)),
                Band::continuous("nir", Array2::from_elem((2, 2), 0.4)),
            ],
            Crs::Sinusoidal,
            GeoTransform::north_up(0.0, 1000.0, 500.0),
        )
        .unwrap()
        .with_year(year, Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_assembles_composite_and_class_band() {
        let stacked = StackAssembler::new()
            .assemble(Layer::Present(composite(2020)), &classes(2020))
            .unwrap();
        let raster = stacked.as_raster().unwrap();
        assert_eq!(raster.band_names(), vec!["red", "nir", CLASS_BAND]);
        assert_eq!(raster.year(), Some(2020));
    }

    #[test]
    fn test_empty_composite_gives_empty_stack() {
        let stacked = StackAssembler::new().assemble(Layer::Empty, &classes(2020)).unwrap();
        assert!(stacked.is_empty());
        assert!(training_collection(vec![stacked]).is_empty());
    }

    #[test]
    fn test_year_mismatch_rejected() {
        let result =
            StackAssembler::new().assemble(Layer::Present(composite(2019)), &classes(2020));
        assert!(matches!(result, Err(StackError::SchemaMismatch(_))));
    }

    #[test]
    fn test_unaligned_grid_rejected() {
        let shifted = Raster::new(
            vec![Band::continuous("red", Array2::from_elem((2, 2), 0.1))],
            Crs::Sinusoidal,
            GeoTransform::north_up(30.0, 1000.0, 500.0),
        )
        .unwrap();
        let result = StackAssembler::new().assemble(Layer::Present(shifted), &classes(2020));
        assert!(matches!(result, Err(StackError::SchemaMismatch(_))));
    }

    #[test]
    fn test_training_collection_filters_by_band_count() {
        let kept = training_collection(vec![
            Layer::Present(composite(2001)),
            Layer::Empty,
            Layer::Present(composite(2020)),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].year(), Some(2020));
    }
}
