//! Core processing stages of the per-year stack pipeline

pub mod projection;
pub mod extent;
pub mod year_index;
pub mod quality_mask;
pub mod normalize;
pub mod composite;
pub mod spectral_index;
pub mod align;
pub mod stack;
pub mod zonal;

// Re-export main types
pub use projection::{CoordTransformer, Crs};
pub use extent::GeoExtent;
pub use year_index::{YearIndex, YearInterval};
pub use quality_mask::{QaBitLayout, QualityMask};
pub use normalize::SceneNormalizer;
pub use composite::{Compositor, nan_median_cube, nan_median_stack};
pub use spectral_index::{IndexCalculator, IndexConfig, normalized_difference};
pub use align::{Aligner, Resampling, TargetGrid};
pub use stack::{StackAssembler, training_collection};
pub use zonal::{
    Histogram, Reducer, Statistics, TransitionMatrix, ZonalReducer, class_transitions,
    dense_histogram, zonal_histogram, zonal_stats, DEFAULT_MAX_PIXELS,
};
