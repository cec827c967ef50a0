//! landstack: Training-Ready Land-Cover Stacks from Landsat Reflectance Archives
//!
//! This library turns multi-sensor surface-reflectance scenes into yearly
//! cloud-masked median composites, adds a vegetation index, aligns them to a
//! coarse land-cover classification and stacks both into one raster per year.
//! Zonal histograms and statistics report on any of the intermediate rasters.

pub mod types;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    Band, BandKind, ClassRaster, GeoTransform, Layer, Raster, RasterCollection, Scene,
    SceneCollection, StackError, StackResult, TimedRaster, YearTag, CLASS_BAND,
    igbp_class_name,
};

pub use config::{PipelineConfig, SensorConfig};
pub use crate::core::{
    zonal_histogram, zonal_stats, Crs, GeoExtent, Reducer, YearIndex, YearInterval,
};
pub use io::{ClassificationArchive, ClassificationLoader, SceneArchive, SceneSource};
pub use pipeline::{Pipeline, YearResults, training_collection};
