//! Collaborator-facing loaders for classification rasters and reflectance scenes

pub mod catalog;
pub mod classification;
pub mod scenes;

#[cfg(feature = "gdal")]
pub mod geotiff;

pub use catalog::{ArchiveCatalog, ClassificationFile, SceneFile};
pub use classification::{ClassificationArchive, ClassificationLoader};
pub use scenes::{SceneArchive, SceneSource};

#[cfg(feature = "gdal")]
pub use geotiff::{read_raster, GeoTiffClassificationArchive, GeoTiffSceneArchive};
