use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::config::SensorConfig;
use crate::types::{Raster, StackError, StackResult};

/// Highest bit position addressable in a 16-bit QA band
pub const MAX_QA_BIT: u8 = 15;

/// Positions of the QA flags a sensor uses to reject pixels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaBitLayout {
    pub fill: u8,
    pub saturated: u8,
    pub cloud: u8,
    pub cloud_shadow: u8,
    /// Dedicated cirrus flag, only on sensors that define one
    #[serde(default)]
    pub cirrus: Option<u8>,
    /// Further flags that exclude a pixel when set
    #[serde(default)]
    pub extra_exclusions: Vec<u8>,
}

impl QaBitLayout {
    /// Landsat Collection 2 QA_PIXEL layout
    pub fn landsat_c2(with_cirrus: bool) -> Self {
        Self {
            fill: 0,
            saturated: 1,
            cloud: 3,
            cloud_shadow: 5,
            cirrus: with_cirrus.then_some(2),
            extra_exclusions: vec![6],
        }
    }

    /// Bits flagging cloud or cloud shadow
    pub fn cloud_bits(&self) -> u16 {
        (1 << self.cloud) | (1 << self.cloud_shadow)
    }

    /// Bits that must be clear for a pixel to count as clear
    pub fn clear_bits(&self) -> u16 {
        let mut bits = (1 << self.fill) | (1 << self.saturated);
        if let Some(cirrus) = self.cirrus {
            bits |= 1 << cirrus;
        }
        for &bit in &self.extra_exclusions {
            bits |= 1 << bit;
        }
        bits
    }

    /// Every bit whose presence rejects the pixel
    pub fn rejection_bits(&self) -> u16 {
        self.cloud_bits() | self.clear_bits()
    }

    pub fn validate(&self) -> StackResult<()> {
        let all = [self.fill, self.saturated, self.cloud, self.cloud_shadow]
            .into_iter()
            .chain(self.cirrus)
            .chain(self.extra_exclusions.iter().copied());
        for bit in all {
            if bit > MAX_QA_BIT {
                return Err(StackError::InvalidConfig(format!(
                    "QA bit {} is outside 0..={}",
                    bit, MAX_QA_BIT
                )));
            }
        }
        Ok(())
    }
}

/// Interpret a QA pixel value as a 16-bit flag word.
///
/// Masked, negative, fractional or oversized values are not decodable.
pub fn qa_flags(value: f32) -> Option<u16> {
    if value.is_nan() || value < 0.0 || value > u16::MAX as f32 || value.fract() != 0.0 {
        return None;
    }
    Some(value as u16)
}

/// Per-pixel validity mask for raw scenes of one sensor
pub struct QualityMask<'a> {
    sensor: &'a SensorConfig,
}

impl<'a> QualityMask<'a> {
    pub fn new(sensor: &'a SensorConfig) -> Self {
        Self { sensor }
    }

    /// Compute the keep-mask (true = keep) of a raw scene.
    ///
    /// A pixel is kept only if its QA word decodes, has no rejection bit set,
    /// and every range-check band lies strictly inside (0, saturation).
    pub fn compute(&self, scene: &Raster) -> StackResult<Array2<bool>> {
        self.sensor.qa_bits.validate()?;
        let qa = scene.band(&self.sensor.qa_band).ok_or_else(|| {
            StackError::SchemaMismatch(format!(
                "{}: QA band '{}' missing from scene",
                self.sensor.id, self.sensor.qa_band
            ))
        })?;

        let range_bands = self
            .sensor
            .range_check_bands
            .iter()
            .map(|name| {
                scene.band(name).ok_or_else(|| {
                    StackError::SchemaMismatch(format!(
                        "{}: range-check band '{}' missing from scene",
                        self.sensor.id, name
                    ))
                })
            })
            .collect::<StackResult<Vec<_>>>()?;

        let rejection = self.sensor.qa_bits.rejection_bits();
        let mut keep = qa
            .data
            .mapv(|v| qa_flags(v).map_or(false, |flags| flags & rejection == 0));

        let saturation = self.sensor.saturation;
        for band in range_bands {
            Zip::from(&mut keep).and(&band.data).for_each(|k, &v| {
                if !(v > 0.0 && v < saturation) {
                    *k = false;
                }
            });
        }

        log::debug!(
            "{}: quality mask keeps {} of {} pixels",
            self.sensor.id,
            keep.iter().filter(|&&k| k).count(),
            keep.len()
        );
        Ok(keep)
    }
}
