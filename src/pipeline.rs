//! Per-year stack pipeline and multi-year driver

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::PipelineConfig;
use crate::core::align::{Aligner, TargetGrid};
use crate::core::composite::Compositor;
use crate::core::extent::GeoExtent;
use crate::core::normalize::SceneNormalizer;
use crate::core::spectral_index::IndexCalculator;
use crate::core::stack::{self, StackAssembler};
use crate::core::year_index::YearInterval;
use crate::core::zonal::{dense_histogram, Histogram, Reducer, Statistics, ZonalReducer};
use crate::io::{ClassificationLoader, SceneSource};
use crate::types::{
    ClassRaster, GeoTransform, Layer, Raster, RasterCollection, SceneCollection, StackError,
    StackResult, TimedRaster, YearTag, CLASS_BAND,
};

/// Outcome of every requested year; one failing year never hides the others
pub type YearResults = BTreeMap<YearTag, StackResult<Layer>>;

/// Builds training-ready stacks from a classification loader and scene sources
pub struct Pipeline {
    config: PipelineConfig,
    classification: Box<dyn ClassificationLoader>,
    sources: Vec<Box<dyn SceneSource>>,
    aligner: Aligner,
}

impl Pipeline {
    /// Create a pipeline; every scene source must match a configured sensor
    pub fn new(
        config: PipelineConfig,
        classification: Box<dyn ClassificationLoader>,
        sources: Vec<Box<dyn SceneSource>>,
    ) -> StackResult<Self> {
        config.validate()?;
        for source in &sources {
            if config.sensor(source.sensor_id()).is_none() {
                return Err(StackError::InvalidConfig(format!(
                    "scene source '{}' has no sensor configuration",
                    source.sensor_id()
                )));
            }
        }
        Ok(Self {
            config,
            classification,
            sources,
            aligner: Aligner::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn load_classification(
        &self,
        year: YearTag,
        extent: &GeoExtent,
    ) -> StackResult<ClassRaster> {
        self.classification.load_classification(year, extent)
    }

    pub fn load_scenes(
        &self,
        sensor: &str,
        interval: &YearInterval,
        extent: &GeoExtent,
    ) -> StackResult<SceneCollection> {
        let source = self
            .sources
            .iter()
            .find(|s| s.sensor_id() == sensor)
            .ok_or_else(|| {
                StackError::InvalidConfig(format!("no scene source for sensor '{}'", sensor))
            })?;
        source.load_scenes(interval, extent)
    }

    /// Normalize every sensor's scenes for the interval and reduce them to one
    /// median composite
    pub fn composite_year(
        &self,
        interval: &YearInterval,
        extent: &GeoExtent,
    ) -> StackResult<Layer> {
        let mut merged = RasterCollection::new();
        for source in &self.sources {
            let sensor = self.config.sensor(source.sensor_id()).ok_or_else(|| {
                StackError::InvalidConfig(format!("unknown sensor '{}'", source.sensor_id()))
            })?;
            let scenes = source.load_scenes(interval, extent)?;
            let normalized = SceneNormalizer::new(sensor).normalize_collection(&scenes)?;
            merged = merged.merge(normalized);
        }

        let merged = self.common_grid(merged, extent)?;
        Compositor::new().composite_year(&merged, interval)
    }

    /// Grid covering the requested extent in the first scene's CRS and resolution,
    /// snapped to that scene's pixel lattice
    fn extent_grid(reference: &Raster, extent: &GeoExtent) -> StackResult<TargetGrid> {
        let footprint = extent.to_crs(reference.crs())?;
        let t = *reference.transform();
        let (rows, cols) = t.window(&footprint);
        let transform = GeoTransform {
            top_left_x: t.top_left_x + cols.start as f64 * t.pixel_width,
            top_left_y: t.top_left_y + rows.start as f64 * t.pixel_height,
            ..t
        };
        let dim = ((rows.end - rows.start) as usize, (cols.end - cols.start) as usize);
        Ok(TargetGrid {
            crs: reference.crs(),
            transform,
            dim,
        })
    }

    /// Resample every scene onto one grid spanning the extent.
    ///
    /// Pixels a scene does not cover come out as NaN, so partial footprints
    /// only contribute where they have data.
    fn common_grid(
        &self,
        scenes: RasterCollection,
        extent: &GeoExtent,
    ) -> StackResult<RasterCollection> {
        let target = match scenes.iter().next() {
            Some(first) => Self::extent_grid(&first.raster, extent)?,
            None => return Ok(scenes),
        };
        let on_target = |raster: &Raster| {
            raster.crs() == target.crs
                && *raster.transform() == target.transform
                && raster.dim() == target.dim
        };
        if scenes.iter().all(|s| on_target(&s.raster)) {
            return Ok(scenes);
        }

        log::debug!(
            "Resampling {} scenes onto {} {:?} grid covering the extent",
            scenes.len(),
            target.crs,
            target.dim
        );
        let aligned = scenes
            .into_vec()
            .into_iter()
            .map(|scene| {
                Ok(TimedRaster {
                    raster: self.aligner.align_to_grid(&scene.raster, &target)?,
                    ..scene
                })
            })
            .collect::<StackResult<Vec<_>>>()?;
        Ok(RasterCollection::from_vec(aligned))
    }

    /// Run the whole chain for one year.
    ///
    /// Returns `Layer::Empty` when no valid scene exists for the year.
    pub fn run_year(&self, year: YearTag, extent: &GeoExtent) -> StackResult<Layer> {
        log::info!("Running stack pipeline for {}", year);
        let interval = YearInterval::for_year(year)?;
        let classes = self.load_classification(year, extent)?;

        let composite = self.composite_year(&interval, extent)?;
        let indexed = IndexCalculator::new(self.config.index.clone()).apply(composite)?;
        let aligned = self.aligner.align(indexed, classes.raster())?;
        StackAssembler::new().assemble(aligned, &classes)
    }

    /// Run independent per-year pipelines and report each year's outcome
    pub fn run_years(&self, years: &[YearTag], extent: &GeoExtent) -> YearResults {
        let years: Vec<YearTag> = years
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let results = self.run_each(&years, extent);

        for (year, result) in &results {
            match result {
                Ok(Layer::Present(raster)) => {
                    log::info!("{}: stack with {} bands", year, raster.band_count())
                }
                Ok(Layer::Empty) => log::info!("{}: no valid scenes, empty stack", year),
                Err(e) => log::warn!("{}: pipeline failed: {}", year, e),
            }
        }
        results
    }

    #[cfg(feature = "parallel")]
    fn run_each(&self, years: &[YearTag], extent: &GeoExtent) -> YearResults {
        years
            .par_iter()
            .map(|&year| (year, self.run_year(year, extent)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_each(&self, years: &[YearTag], extent: &GeoExtent) -> YearResults {
        years
            .iter()
            .map(|&year| (year, self.run_year(year, extent)))
            .collect()
    }

    pub fn zonal_histogram(
        &self,
        raster: &Raster,
        band: &str,
        extent: &GeoExtent,
        scale: f64,
    ) -> StackResult<Histogram> {
        ZonalReducer::new(self.config.max_pixels).histogram(raster, band, extent, scale)
    }

    pub fn zonal_stats(
        &self,
        raster: &Raster,
        band: &str,
        extent: &GeoExtent,
        scale: f64,
        reducers: &[Reducer],
    ) -> StackResult<Statistics> {
        ZonalReducer::new(self.config.max_pixels).statistics(raster, band, extent, scale, reducers)
    }

    /// Class frequencies of the year's classification, with zeros for absent classes
    pub fn class_histogram(
        &self,
        year: YearTag,
        extent: &GeoExtent,
        scale: f64,
    ) -> StackResult<Histogram> {
        let classes = self.load_classification(year, extent)?;
        let histogram = self.zonal_histogram(classes.raster(), CLASS_BAND, extent, scale)?;
        Ok(dense_histogram(&histogram, self.config.class_range()))
    }
}

/// Successful, non-empty stacks in year order
pub fn training_collection(results: YearResults) -> Vec<Raster> {
    stack::training_collection(results.into_values().filter_map(Result::ok))
}
