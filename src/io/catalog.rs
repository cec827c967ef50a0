use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::types::{StackError, StackResult, YearTag};

/// A scene file named `<SENSOR>_<YYYYMMDD>...tif`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneFile {
    pub path: PathBuf,
    pub sensor: String,
    pub date: NaiveDate,
}

/// A classification file named `<product>_<YYYY>.tif`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationFile {
    pub path: PathBuf,
    pub product: String,
    pub year: YearTag,
}

/// Filename-based discovery of scene and classification GeoTIFFs in a directory
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    scene_pattern: Regex,
    classification_pattern: Regex,
}

impl ArchiveCatalog {
    pub fn new() -> StackResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| StackError::Processing(format!("Invalid filename pattern: {}", e)))
        };
        Ok(Self {
            scene_pattern: compile(r"^([A-Z]{2}\d{2})_(\d{4})(\d{2})(\d{2})[^/]*\.tiff?$")?,
            classification_pattern: compile(
                r"^([A-Za-z0-9]+(?:[._-][A-Za-z0-9]+)*)_(\d{4})\.tiff?$",
            )?,
        })
    }

    /// Sensor and acquisition date encoded in a scene filename
    pub fn parse_scene_name(&self, file_name: &str) -> Option<(String, NaiveDate)> {
        let captures = self.scene_pattern.captures(file_name)?;
        let year = captures[2].parse().ok()?;
        let month = captures[3].parse().ok()?;
        let day = captures[4].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some((captures[1].to_string(), date))
    }

    /// Product name and year encoded in a classification filename
    pub fn parse_classification_name(&self, file_name: &str) -> Option<(String, YearTag)> {
        let captures = self.classification_pattern.captures(file_name)?;
        let year = captures[2].parse().ok()?;
        Some((captures[1].to_string(), year))
    }

    /// Scenes of `sensor` in `dir`, sorted by acquisition date
    pub fn scenes<P: AsRef<Path>>(&self, dir: P, sensor: &str) -> StackResult<Vec<SceneFile>> {
        let mut found: Vec<SceneFile> = list_files(dir.as_ref())?
            .into_iter()
            .filter_map(|(path, name)| {
                let (file_sensor, date) = self.parse_scene_name(&name)?;
                (file_sensor == sensor).then_some(SceneFile {
                    path,
                    sensor: file_sensor,
                    date,
                })
            })
            .collect();
        found.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
        log::debug!(
            "Found {} {} scenes in {}",
            found.len(),
            sensor,
            dir.as_ref().display()
        );
        Ok(found)
    }

    /// Classification files of `product` in `dir`, sorted by year
    pub fn classifications<P: AsRef<Path>>(
        &self,
        dir: P,
        product: &str,
    ) -> StackResult<Vec<ClassificationFile>> {
        let mut found: Vec<ClassificationFile> = list_files(dir.as_ref())?
            .into_iter()
            .filter_map(|(path, name)| {
                let (file_product, year) = self.parse_classification_name(&name)?;
                (file_product == product).then_some(ClassificationFile {
                    path,
                    product: file_product,
                    year,
                })
            })
            .collect();
        found.sort_by_key(|f| f.year);
        log::debug!(
            "Found {} {} classification files in {}",
            found.len(),
            product,
            dir.as_ref().display()
        );
        Ok(found)
    }
}

fn list_files(dir: &Path) -> StackResult<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push((entry.path(), name.to_string()));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scene_name() {
        let catalog = ArchiveCatalog::new().unwrap();
        assert_eq!(
            catalog.parse_scene_name("LC08_20200514_044034.tif"),
            Some(("LC08".to_string(), NaiveDate::from_ymd_opt(2020, 5, 14).unwrap()))
        );
        assert_eq!(catalog.parse_scene_name("LC08_20201340.tif"), None);
        assert_eq!(catalog.parse_scene_name("notes.txt"), None);
    }

    #[test]
    fn test_parse_classification_name() {
        let catalog = ArchiveCatalog::new().unwrap();
        assert_eq!(
            catalog.parse_classification_name("MCD12Q1_2001.tif"),
            Some(("MCD12Q1".to_string(), 2001))
        );
        assert_eq!(catalog.parse_classification_name("MCD12Q1.tif"), None);
    }
}
