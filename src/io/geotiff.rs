use chrono::{TimeZone, Utc};
use gdal::Dataset;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use super::catalog::{ArchiveCatalog, SceneFile};
use super::classification::{prepare_classification, ClassificationLoader};
use super::scenes::SceneSource;
use crate::config::SensorConfig;
use crate::core::extent::GeoExtent;
use crate::core::projection::Crs;
use crate::core::year_index::YearInterval;
use crate::types::{
    Band, BandKind, ClassRaster, GeoTransform, Raster, SceneCollection, StackError, StackResult,
    TimedRaster, YearTag,
};

/// Read a GeoTIFF into a raster, naming bands in file order.
///
/// Nodata values become NaN.
pub fn read_raster<P: AsRef<Path>>(
    path: P,
    names: &[String],
    kind: BandKind,
) -> StackResult<Raster> {
    log::info!("Reading raster from: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;

    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let crs = read_crs(&dataset)?;
    let (width, height) = dataset.raster_size();
    let count = dataset.raster_count() as usize;
    log::debug!("Raster size: {}x{}, {} bands, {}", width, height, count, crs);

    if count < names.len() {
        return Err(StackError::SchemaMismatch(format!(
            "{} has {} bands, expected at least {}",
            path.as_ref().display(),
            count,
            names.len()
        )));
    }

    let mut bands = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let rasterband = dataset.rasterband(index as isize + 1)?;
        let nodata = rasterband.no_data_value();
        let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let mut data = Array2::from_shape_vec((height, width), buffer.data).map_err(|e| {
            StackError::Processing(format!("Failed to reshape band '{}': {}", name, e))
        })?;
        if let Some(nodata) = nodata {
            let nodata = nodata as f32;
            data.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
        }
        bands.push(Band {
            name: name.clone(),
            kind,
            data,
        });
    }

    Raster::new(bands, crs, transform)
}

fn read_crs(dataset: &Dataset) -> StackResult<Crs> {
    let srs = dataset.spatial_ref()?;
    if let Ok(code) = srs.auth_code() {
        return Crs::from_epsg(code as u32);
    }
    // MODIS products carry a custom sinusoidal definition without an authority code
    let proj4 = srs.to_proj4()?;
    if proj4.contains("+proj=sinu") {
        return Ok(Crs::Sinusoidal);
    }
    Err(StackError::Projection(format!("Unsupported spatial reference: {}", proj4)))
}

/// Yearly classification GeoTIFFs (`<product>_<YYYY>.tif`) in a directory
#[derive(Debug, Clone)]
pub struct GeoTiffClassificationArchive {
    files: BTreeMap<YearTag, PathBuf>,
    classes: RangeInclusive<i32>,
}

impl GeoTiffClassificationArchive {
    pub fn open<P: AsRef<Path>>(
        dir: P,
        product: &str,
        classes: RangeInclusive<i32>,
    ) -> StackResult<Self> {
        let files = ArchiveCatalog::new()?
            .classifications(dir, product)?
            .into_iter()
            .map(|f| (f.year, f.path))
            .collect();
        Ok(Self { files, classes })
    }
}

impl ClassificationLoader for GeoTiffClassificationArchive {
    fn load_classification(&self, year: YearTag, extent: &GeoExtent) -> StackResult<ClassRaster> {
        let path = self.files.get(&year).ok_or_else(|| StackError::DataUnavailable {
            year,
            reason: "no classification file for this year".to_string(),
        })?;
        let raster = read_raster(path, &["classification".to_string()], BandKind::Categorical)?;
        prepare_classification(&raster, year, extent, self.classes.clone())
    }
}

/// Scene GeoTIFFs of one sensor; each file holds the source bands then the QA band
#[derive(Debug, Clone)]
pub struct GeoTiffSceneArchive {
    sensor: SensorConfig,
    files: Vec<SceneFile>,
}

impl GeoTiffSceneArchive {
    pub fn open<P: AsRef<Path>>(dir: P, sensor: SensorConfig) -> StackResult<Self> {
        let files = ArchiveCatalog::new()?.scenes(dir, &sensor.id)?;
        Ok(Self { sensor, files })
    }

    fn band_names(&self) -> Vec<String> {
        let mut names = self.sensor.source_bands.clone();
        names.push(self.sensor.qa_band.clone());
        names
    }
}

impl SceneSource for GeoTiffSceneArchive {
    fn sensor_id(&self) -> &str {
        &self.sensor.id
    }

    fn load_scenes(
        &self,
        interval: &YearInterval,
        extent: &GeoExtent,
    ) -> StackResult<SceneCollection> {
        let names = self.band_names();
        let mut scenes = Vec::new();
        for file in &self.files {
            let timestamp = Utc.from_utc_datetime(&file.date.and_time(chrono::NaiveTime::MIN));
            if !interval.contains(&timestamp) {
                continue;
            }
            let raster = read_raster(&file.path, &names, BandKind::Continuous)?;
            if let Some(raster) = raster.clip(extent)? {
                scenes.push(TimedRaster {
                    timestamp,
                    sensor: self.sensor.id.clone(),
                    raster,
                });
            }
        }
        log::info!(
            "{}: {} scenes in {} overlap the extent",
            self.sensor.id,
            scenes.len(),
            interval.year()
        );
        Ok(SceneCollection::from_vec(scenes))
    }
}
