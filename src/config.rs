//! Pipeline configuration: per-sensor band tables, QA layouts and run limits

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::core::quality_mask::QaBitLayout;
use crate::core::spectral_index::IndexConfig;
use crate::core::zonal::DEFAULT_MAX_PIXELS;
use crate::types::{StackError, StackResult, CLASS_BAND};

/// Raw integer scale of Landsat surface reflectance
pub const REFLECTANCE_SCALE: f32 = 10_000.0;

/// Canonical band set shared by every reflectance archive
pub const CANONICAL_BANDS: [&str; 6] = ["blue", "green", "red", "nir", "swir1", "swir2"];

/// Band tables, QA layout and constants of one reflectance archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor family identifier, e.g. "LC08"
    pub id: String,
    pub qa_band: String,
    /// Source band identifiers, paired positionally with `canonical_bands`
    pub source_bands: Vec<String>,
    pub canonical_bands: Vec<String>,
    /// Raw bands that must lie in (0, saturation) for a pixel to be kept
    pub range_check_bands: Vec<String>,
    pub qa_bits: QaBitLayout,
    /// Divisor mapping raw integers to unit reflectance
    pub scale: f32,
    /// Raw value at or above which a reading counts as saturated
    pub saturation: f32,
}

impl SensorConfig {
    /// Landsat 8 OLI, Collection 2 Level 2 (defines a cirrus QA bit)
    pub fn landsat8() -> Self {
        let source: Vec<String> = ["SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            id: "LC08".to_string(),
            qa_band: "QA_PIXEL".to_string(),
            range_check_bands: source.clone(),
            source_bands: source,
            canonical_bands: CANONICAL_BANDS.iter().map(|s| s.to_string()).collect(),
            qa_bits: QaBitLayout::landsat_c2(true),
            scale: REFLECTANCE_SCALE,
            saturation: REFLECTANCE_SCALE,
        }
    }

    /// Landsat 7 ETM+, Collection 2 Level 2 (no cirrus QA bit)
    pub fn landsat7() -> Self {
        let source: Vec<String> = ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            id: "LE07".to_string(),
            qa_band: "QA_PIXEL".to_string(),
            range_check_bands: source.clone(),
            source_bands: source,
            canonical_bands: CANONICAL_BANDS.iter().map(|s| s.to_string()).collect(),
            qa_bits: QaBitLayout::landsat_c2(false),
            scale: REFLECTANCE_SCALE,
            saturation: REFLECTANCE_SCALE,
        }
    }

    pub fn validate(&self) -> StackResult<()> {
        if self.source_bands.len() != self.canonical_bands.len() {
            return Err(StackError::InvalidConfig(format!(
                "{}: {} source bands but {} canonical names",
                self.id,
                self.source_bands.len(),
                self.canonical_bands.len()
            )));
        }
        if self.canonical_bands.is_empty() {
            return Err(StackError::InvalidConfig(format!(
                "{}: no bands declared",
                self.id
            )));
        }
        ensure_unique(&self.id, "canonical", &self.canonical_bands)?;
        ensure_unique(&self.id, "source", &self.source_bands)?;
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(StackError::InvalidConfig(format!(
                "{}: scale must be positive, got {}",
                self.id, self.scale
            )));
        }
        if !(self.saturation.is_finite() && self.saturation > 0.0) {
            return Err(StackError::InvalidConfig(format!(
                "{}: saturation must be positive, got {}",
                self.id, self.saturation
            )));
        }
        self.qa_bits.validate()
    }
}

fn ensure_unique(sensor: &str, what: &str, names: &[String]) -> StackResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(StackError::InvalidConfig(format!(
                "{}: duplicate {} band '{}'",
                sensor, what, name
            )));
        }
    }
    Ok(())
}

/// Complete configuration of a multi-year run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default = "IndexConfig::ndvi")]
    pub index: IndexConfig,
    #[serde(default = "default_class_min")]
    pub class_min: i32,
    #[serde(default = "default_class_max")]
    pub class_max: i32,
    /// Pixel budget of one zonal reduction
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
}

fn default_sensors() -> Vec<SensorConfig> {
    vec![SensorConfig::landsat7(), SensorConfig::landsat8()]
}

fn default_class_min() -> i32 {
    1
}

fn default_class_max() -> i32 {
    17
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sensors: default_sensors(),
            index: IndexConfig::ndvi(),
            class_min: default_class_min(),
            class_max: default_class_max(),
            max_pixels: default_max_pixels(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> StackResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> StackResult<Self> {
        log::info!("Loading pipeline configuration: {}", path.as_ref().display());
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> StackResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn class_range(&self) -> RangeInclusive<i32> {
        self.class_min..=self.class_max
    }

    pub fn sensor(&self, id: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.id == id)
    }

    /// Canonical band names shared by all sensors
    pub fn canonical_bands(&self) -> &[String] {
        self.sensors
            .first()
            .map(|s| s.canonical_bands.as_slice())
            .unwrap_or(&[])
    }

    /// Reject configurations that would fail later in the pipeline
    pub fn validate(&self) -> StackResult<()> {
        let first = self.sensors.first().ok_or_else(|| {
            StackError::InvalidConfig("at least one sensor is required".to_string())
        })?;

        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            sensor.validate()?;
            if !ids.insert(sensor.id.as_str()) {
                return Err(StackError::InvalidConfig(format!(
                    "sensor '{}' declared twice",
                    sensor.id
                )));
            }
            // Scenes from every sensor are composited together
            if sensor.canonical_bands != first.canonical_bands {
                return Err(StackError::InvalidConfig(format!(
                    "sensor '{}' canonical bands {:?} differ from '{}' {:?}",
                    sensor.id, sensor.canonical_bands, first.id, first.canonical_bands
                )));
            }
        }

        if self.class_min > self.class_max {
            return Err(StackError::InvalidConfig(format!(
                "class range {}..={} is empty",
                self.class_min, self.class_max
            )));
        }
        if self.max_pixels == 0 {
            return Err(StackError::InvalidConfig(
                "max_pixels must be positive".to_string(),
            ));
        }

        let canonical = &first.canonical_bands;
        if canonical.iter().any(|b| b == &self.index.output) {
            return Err(StackError::InvalidConfig(format!(
                "index output '{}' collides with a spectral band",
                self.index.output
            )));
        }
        if canonical.iter().any(|b| b == CLASS_BAND) || self.index.output == CLASS_BAND {
            return Err(StackError::InvalidConfig(format!(
                "classification band '{}' collides with a spectral or index band",
                CLASS_BAND
            )));
        }
        Ok(())
    }
}
