use chrono::{DateTime, Utc};

use crate::core::extent::GeoExtent;
use crate::core::year_index::YearInterval;
use crate::types::{Raster, SceneCollection, StackResult, TimedRaster};

/// Source of raw reflectance scenes for one sensor family
pub trait SceneSource: Send + Sync {
    /// Identifier matching a configured sensor, e.g. "LC08"
    fn sensor_id(&self) -> &str;

    /// Scenes acquired inside `interval` that overlap `extent`, clipped to it.
    ///
    /// Zero scenes is a valid answer.
    fn load_scenes(
        &self,
        interval: &YearInterval,
        extent: &GeoExtent,
    ) -> StackResult<SceneCollection>;
}

/// Keep scenes inside the interval, clipped to the extent; non-overlapping scenes are dropped
pub(crate) fn select_scenes<'a, I>(
    scenes: I,
    interval: &YearInterval,
    extent: &GeoExtent,
) -> StackResult<SceneCollection>
where
    I: IntoIterator<Item = &'a TimedRaster>,
{
    let mut selected = Vec::new();
    for scene in scenes {
        if !interval.contains(&scene.timestamp) {
            continue;
        }
        match scene.raster.clip(extent)? {
            Some(raster) => selected.push(TimedRaster {
                timestamp: scene.timestamp,
                sensor: scene.sensor.clone(),
                raster,
            }),
            None => log::debug!(
                "{} scene at {} does not overlap the extent",
                scene.sensor,
                scene.timestamp
            ),
        }
    }
    Ok(SceneCollection::from_vec(selected))
}

/// Raw scenes of one sensor held in memory
#[derive(Debug, Clone)]
pub struct SceneArchive {
    sensor: String,
    scenes: Vec<TimedRaster>,
}

impl SceneArchive {
    pub fn new(sensor: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            scenes: Vec::new(),
        }
    }

    pub fn with_scene(mut self, timestamp: DateTime<Utc>, raster: Raster) -> Self {
        self.scenes.push(TimedRaster {
            timestamp,
            sensor: self.sensor.clone(),
            raster,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl SceneSource for SceneArchive {
    fn sensor_id(&self) -> &str {
        &self.sensor
    }

    fn load_scenes(
        &self,
        interval: &YearInterval,
        extent: &GeoExtent,
    ) -> StackResult<SceneCollection> {
        let scenes = select_scenes(&self.scenes, interval, extent)?;
        log::info!(
            "{}: {} of {} scenes in {} overlap the extent",
            self.sensor,
            scenes.len(),
            self.scenes.len(),
            interval.year()
        );
        Ok(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::Crs;
    use crate::types::{Band, GeoTransform};
    use chrono::TimeZone;
    use ndarray::Array2;

    fn raster(top_left_x: f64) -> Raster {
        Raster::new(
            vec![Band::continuous("SR_B4", Array2::from_elem((4, 4), 2000.0))],
            Crs::Utm { zone: 33, north: true },
            GeoTransform::north_up(top_left_x, 4_000_120.0, 30.0),
        )
        .unwrap()
    }

    #[test]
    fn test_filters_by_interval_and_extent() {
        let archive = SceneArchive::new("LC08")
            .with_scene(Utc.with_ymd_and_hms(2020, 5, 1, 10, 0, 0).unwrap(), raster(500_000.0))
            .with_scene(Utc.with_ymd_and_hms(2020, 2, 1, 10, 0, 0).unwrap(), raster(500_000.0))
            .with_scene(Utc.with_ymd_and_hms(2019, 5, 1, 10, 0, 0).unwrap(), raster(500_000.0))
            .with_scene(Utc.with_ymd_and_hms(2020, 6, 1, 10, 0, 0).unwrap(), raster(900_000.0));

        let extent = GeoExtent::new(
            Crs::Utm { zone: 33, north: true },
            500_000.0,
            4_000_000.0,
            500_060.0,
            4_000_120.0,
        )
        .unwrap();
        let interval = YearInterval::for_year(2020).unwrap();
        let scenes = archive.load_scenes(&interval, &extent).unwrap();

        assert_eq!(scenes.len(), 2);
        let first = scenes.iter().next().unwrap();
        assert_eq!(first.timestamp, Utc.with_ymd_and_hms(2020, 2, 1, 10, 0, 0).unwrap());
        assert_eq!(first.raster.dim(), (4, 2));
        assert_eq!(first.sensor, "LC08");
    }

    #[test]
    fn test_no_scenes_is_not_an_error() {
        let archive = SceneArchive::new("LE07");
        let extent = GeoExtent::from_lon_lat(10.0, 45.0, 10.1, 45.1).unwrap();
        let interval = YearInterval::for_year(2001).unwrap();
        assert!(archive.load_scenes(&interval, &extent).unwrap().is_empty());
    }
}
