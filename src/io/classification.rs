use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::core::extent::GeoExtent;
use crate::core::year_index::YearInterval;
use crate::types::{ClassRaster, Raster, StackError, StackResult, YearTag};

/// Source of the one coarse classification raster valid for each year
pub trait ClassificationLoader: Send + Sync {
    /// Load the year's classification clipped to `extent`.
    ///
    /// Fails with `DataUnavailable` when no asset exists for the year.
    fn load_classification(&self, year: YearTag, extent: &GeoExtent) -> StackResult<ClassRaster>;
}

/// Tag, clip and clean a single-band classification raster for one year
pub(crate) fn prepare_classification(
    raster: &Raster,
    year: YearTag,
    extent: &GeoExtent,
    classes: RangeInclusive<i32>,
) -> StackResult<ClassRaster> {
    let interval = YearInterval::for_year(year)?;
    let clipped = raster.clip(extent)?.ok_or_else(|| StackError::DataUnavailable {
        year,
        reason: "classification does not overlap the requested extent".to_string(),
    })?;
    let classes = ClassRaster::from_raster(
        clipped.with_year(year, interval.start_timestamp()),
        classes,
    )?;
    log::info!(
        "Loaded classification for {}: {:?} pixels, classes {:?}",
        year,
        classes.raster().dim(),
        classes.classes()
    );
    Ok(classes)
}

/// Classification rasters held in memory, one per year
#[derive(Debug, Clone)]
pub struct ClassificationArchive {
    assets: BTreeMap<YearTag, Raster>,
    classes: RangeInclusive<i32>,
}

impl ClassificationArchive {
    pub fn new(classes: RangeInclusive<i32>) -> Self {
        Self {
            assets: BTreeMap::new(),
            classes,
        }
    }

    /// Register the raster of `year`, replacing any earlier one
    pub fn with_year(mut self, year: YearTag, raster: Raster) -> Self {
        self.assets.insert(year, raster);
        self
    }

    pub fn years(&self) -> Vec<YearTag> {
        self.assets.keys().copied().collect()
    }
}

impl ClassificationLoader for ClassificationArchive {
    fn load_classification(&self, year: YearTag, extent: &GeoExtent) -> StackResult<ClassRaster> {
        let raster = self.assets.get(&year).ok_or_else(|| StackError::DataUnavailable {
            year,
            reason: format!("no classification asset, archive covers {:?}", self.years()),
        })?;
        prepare_classification(raster, year, extent, self.classes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::Crs;
    use crate::types::{Band, GeoTransform, CLASS_BAND};
    use ndarray::Array2;

    fn archive() -> ClassificationArchive {
        let data = Array2::from_shape_fn((4, 4), |(r, _)| if r == 0 { 255.0 } else { 12.0 });
        let raster = Raster::new(
            vec![Band::categorical("LC_Type1", data)],
            Crs::Sinusoidal,
            GeoTransform::north_up(0.0, 2000.0, 500.0),
        )
        .unwrap();
        ClassificationArchive::new(1..=17).with_year(2001, raster)
    }

    #[test]
    fn test_load_clips_tags_and_cleans() {
        let extent = GeoExtent::new(Crs::Sinusoidal, 0.0, 0.0, 1000.0, 2000.0).unwrap();
        let classes = archive().load_classification(2001, &extent).unwrap();

        assert_eq!(classes.raster().dim(), (4, 2));
        assert_eq!(classes.year(), Some(2001));
        assert_eq!(classes.band().name, CLASS_BAND);
        assert_eq!(classes.band().valid_count(), 6);
    }

    #[test]
    fn test_extent_inside_one_pixel_loads_that_pixel() {
        // 200 m square in the lower-left of pixel (1, 0), clear of its centre
        let extent = GeoExtent::new(Crs::Sinusoidal, 10.0, 1010.0, 210.0, 1210.0).unwrap();
        let classes = archive().load_classification(2001, &extent).unwrap();

        assert_eq!(classes.raster().dim(), (1, 1));
        assert_eq!(classes.band().data[[0, 0]], 12.0);
        assert_eq!(classes.raster().transform().top_left_y, 1500.0);
    }

    #[test]
    fn test_missing_year_is_unavailable() {
        let extent = GeoExtent::new(Crs::Sinusoidal, 0.0, 0.0, 1000.0, 1000.0).unwrap();
        let result = archive().load_classification(2020, &extent);
        assert!(matches!(result, Err(StackError::DataUnavailable { year: 2020, .. })));
    }

    #[test]
    fn test_disjoint_extent_is_unavailable() {
        let extent = GeoExtent::new(Crs::Sinusoidal, 5000.0, 5000.0, 6000.0, 6000.0).unwrap();
        let result = archive().load_classification(2001, &extent);
        assert!(matches!(result, Err(StackError::DataUnavailable { .. })));
    }
}
