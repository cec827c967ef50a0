use approx::assert_abs_diff_eq;
use chrono::{TimeZone, Utc};
use landstack::core::{Compositor, IndexCalculator, StackAssembler};
use landstack::types::{Band, GeoTransform, Layer, Raster, StackError, CLASS_BAND};
use landstack::{
    ClassificationArchive, ClassificationLoader, Crs, GeoExtent, Pipeline, PipelineConfig,
    SceneArchive, SensorConfig, YearInterval,
};
use ndarray::Array2;

const ZONE: Crs = Crs::Utm { zone: 33, north: true };
const ORIGIN_X: f64 = 500_000.0;
const ORIGIN_Y: f64 = 4_000_180.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn extent() -> GeoExtent {
    GeoExtent::new(ZONE, ORIGIN_X, ORIGIN_Y - 180.0, ORIGIN_X + 180.0, ORIGIN_Y)
        .expect("valid extent")
}

/// Raw Landsat 8 scene on a 6x6 grid of 30 m pixels
fn landsat8_scene(reflectance: f32, qa: f32) -> Raster {
    landsat8_strip(reflectance, qa, 6)
}

/// Raw Landsat 8 scene covering the western `cols` columns of the extent
fn landsat8_strip(reflectance: f32, qa: f32, cols: usize) -> Raster {
    let sensor = SensorConfig::landsat8();
    let mut bands: Vec<Band> = sensor
        .source_bands
        .iter()
        .map(|name| Band::continuous(name.clone(), Array2::from_elem((6, cols), reflectance)))
        .collect();
    bands.push(Band::categorical(sensor.qa_band.clone(), Array2::from_elem((6, cols), qa)));
    Raster::new(bands, ZONE, GeoTransform::north_up(ORIGIN_X, ORIGIN_Y, 30.0))
        .expect("valid scene")
}

/// Classification on a 2x2 grid of 90 m pixels covering the scenes
fn classification(codes: [f32; 4]) -> Raster {
    let data = Array2::from_shape_vec((2, 2), codes.to_vec()).expect("2x2 codes");
    Raster::new(
        vec![Band::categorical("LC_Type1", data)],
        ZONE,
        GeoTransform::north_up(ORIGIN_X, ORIGIN_Y, 90.0),
    )
    .expect("valid classification")
}

fn pipeline(scenes: SceneArchive, classes: ClassificationArchive) -> Pipeline {
    let config = PipelineConfig {
        sensors: vec![SensorConfig::landsat8()],
        ..PipelineConfig::default()
    };
    Pipeline::new(config, Box::new(classes), vec![Box::new(scenes)]).expect("valid pipeline")
}

#[test]
fn test_cloud_scene_contributes_nothing_to_composite() {
    init_logging();
    let cloud_qa = (1 << 3) as f32;
    let scenes = SceneArchive::new("LC08")
        .with_scene(
            Utc.with_ymd_and_hms(2020, 4, 2, 10, 0, 0).unwrap(),
            landsat8_scene(9000.0, cloud_qa),
        )
        .with_scene(
            Utc.with_ymd_and_hms(2020, 4, 18, 10, 0, 0).unwrap(),
            landsat8_scene(2000.0, 0.0),
        );
    let pipeline = pipeline(scenes, ClassificationArchive::new(1..=17));

    let interval = YearInterval::for_year(2020).unwrap();
    let composite = pipeline.composite_year(&interval, &extent()).expect("composite");
    let raster = composite.as_raster().expect("composite has bands");

    assert_eq!(raster.band_names(), vec!["blue", "green", "red", "nir", "swir1", "swir2"]);
    assert_eq!(raster.year(), Some(2020));
    assert_eq!(raster.timestamp(), Some(interval.start_timestamp()));
    for band in raster.bands() {
        for &value in band.data.iter() {
            assert_abs_diff_eq!(value, 0.2, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_partial_first_scene_does_not_shrink_composite() {
    init_logging();
    let scenes = SceneArchive::new("LC08")
        .with_scene(
            Utc.with_ymd_and_hms(2020, 3, 1, 10, 0, 0).unwrap(),
            landsat8_strip(3000.0, 0.0, 3),
        )
        .with_scene(
            Utc.with_ymd_and_hms(2020, 6, 1, 10, 0, 0).unwrap(),
            landsat8_scene(1000.0, 0.0),
        );
    let pipeline = pipeline(scenes, ClassificationArchive::new(1..=17));

    let interval = YearInterval::for_year(2020).unwrap();
    let composite = pipeline.composite_year(&interval, &extent()).expect("composite");
    let raster = composite.as_raster().expect("composite has bands");

    assert_eq!(raster.dim(), (6, 6));
    assert_eq!(raster.transform().top_left_x, ORIGIN_X);
    assert_eq!(raster.transform().top_left_y, ORIGIN_Y);
    let red = &raster.band("red").unwrap().data;
    for row in 0..6 {
        for col in 0..3 {
            assert_abs_diff_eq!(red[[row, col]], 0.2, epsilon = 1e-6);
        }
        for col in 3..6 {
            assert_abs_diff_eq!(red[[row, col]], 0.1, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_composite_without_nir_gets_no_index() {
    let data = Array2::from_elem((3, 3), 0.2);
    let composite = Raster::new(
        vec![
            Band::continuous("blue", data.clone()),
            Band::continuous("green", data.clone()),
            Band::continuous("red", data),
        ],
        ZONE,
        GeoTransform::north_up(ORIGIN_X, ORIGIN_Y, 30.0),
    )
    .unwrap();

    let output = IndexCalculator::ndvi().apply(Layer::Present(composite.clone())).unwrap();
    assert_eq!(output, Layer::Present(composite));
}

#[test]
fn test_classification_histogram_omits_absent_classes() {
    init_logging();
    let mut codes = vec![12.0f32; 40];
    codes.extend(vec![13.0f32; 10]);
    let raster = Raster::new(
        vec![Band::categorical(
            "LC_Type1",
            Array2::from_shape_vec((5, 10), codes).unwrap(),
        )],
        Crs::Sinusoidal,
        GeoTransform::north_up(0.0, 2500.0, 500.0),
    )
    .unwrap();
    let region = GeoExtent::new(Crs::Sinusoidal, 0.0, 0.0, 5000.0, 2500.0).unwrap();
    let archive = ClassificationArchive::new(1..=17).with_year(2001, raster);
    let pipeline = pipeline(SceneArchive::new("LC08"), archive);

    let classes = pipeline.load_classification(2001, &region).unwrap();
    let histogram = pipeline
        .zonal_histogram(classes.raster(), CLASS_BAND, &region, 500.0)
        .unwrap();
    assert_eq!(histogram.len(), 2);
    assert_eq!(histogram[&12], 40);
    assert_eq!(histogram[&13], 10);
    assert_eq!(histogram.get(&7), None);

    let dense = pipeline.class_histogram(2001, &region, 500.0).unwrap();
    assert_eq!(dense.len(), 17);
    assert_eq!(dense[&7], 0);
    assert_eq!(dense[&12], 40);
}

#[test]
fn test_empty_composite_propagates_to_empty_stack() {
    let interval = YearInterval::for_year(2001).unwrap();
    let composite = Compositor::new()
        .composite_year(&Default::default(), &interval)
        .unwrap();
    assert!(composite.is_empty());

    let archive = ClassificationArchive::new(1..=17).with_year(2001, classification([12.0; 4]));
    let classes = archive.load_classification(2001, &extent()).unwrap();

    let indexed = IndexCalculator::ndvi().apply(composite).unwrap();
    let aligned = landstack::core::Aligner::new().align(indexed, classes.raster()).unwrap();
    let stacked = StackAssembler::new().assemble(aligned, &classes).unwrap();

    assert!(stacked.is_empty());
    assert_eq!(stacked.band_count(), 0);
}

#[test]
fn test_run_year_builds_aligned_training_stack() {
    init_logging();
    let scenes = SceneArchive::new("LC08").with_scene(
        Utc.with_ymd_and_hms(2020, 7, 1, 10, 0, 0).unwrap(),
        landsat8_scene(2000.0, 0.0),
    );
    let classes = ClassificationArchive::new(1..=17)
        .with_year(2020, classification([12.0, 13.0, 255.0, 12.0]));
    let pipeline = pipeline(scenes, classes);

    let stack = pipeline.run_year(2020, &extent()).expect("run year");
    let raster = stack.as_raster().expect("stack has bands");

    assert_eq!(
        raster.band_names(),
        vec!["blue", "green", "red", "nir", "swir1", "swir2", "ndvi", CLASS_BAND]
    );
    assert_eq!(raster.dim(), (2, 2));
    assert_eq!(raster.resolution(), (90.0, 90.0));
    assert_eq!(raster.year(), Some(2020));

    let red = &raster.band("red").unwrap().data;
    assert_abs_diff_eq!(red[[1, 1]], 0.2, epsilon = 1e-6);
    let ndvi = &raster.band("ndvi").unwrap().data;
    assert_abs_diff_eq!(ndvi[[0, 0]], 0.0, epsilon = 1e-6);

    let landcover = &raster.band(CLASS_BAND).unwrap().data;
    assert_eq!(landcover[[0, 1]], 13.0);
    assert!(landcover[[1, 0]].is_nan());
}

#[test]
fn test_failing_year_does_not_abort_other_years() {
    init_logging();
    let scenes = SceneArchive::new("LC08").with_scene(
        Utc.with_ymd_and_hms(2020, 7, 1, 10, 0, 0).unwrap(),
        landsat8_scene(2000.0, 0.0),
    );
    let classes = ClassificationArchive::new(1..=17)
        .with_year(2001, classification([12.0; 4]))
        .with_year(2020, classification([12.0; 4]));
    let pipeline = pipeline(scenes, classes);

    let results = pipeline.run_years(&[2020, 2001, 2010, 2020], &extent());
    assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![2001, 2010, 2020]);

    assert!(matches!(results[&2001], Ok(Layer::Empty)));
    assert!(matches!(
        results[&2010],
        Err(StackError::DataUnavailable { year: 2010, .. })
    ));
    assert_eq!(results[&2020].as_ref().map(Layer::band_count).ok(), Some(8));

    let training = landstack::training_collection(results);
    assert_eq!(training.len(), 1);
    assert_eq!(training[0].year(), Some(2020));
}

#[test]
fn test_scene_missing_source_band_is_schema_mismatch() {
    let broken = landsat8_scene(2000.0, 0.0).select(&["SR_B2", "QA_PIXEL"]).unwrap();
    let scenes = SceneArchive::new("LC08")
        .with_scene(Utc.with_ymd_and_hms(2020, 7, 1, 10, 0, 0).unwrap(), broken);
    let classes = ClassificationArchive::new(1..=17).with_year(2020, classification([12.0; 4]));
    let pipeline = pipeline(scenes, classes);

    let result = pipeline.run_year(2020, &extent());
    assert!(matches!(result, Err(StackError::SchemaMismatch(_))));
}

#[test]
fn test_unconfigured_scene_source_rejected() {
    let config = PipelineConfig {
        sensors: vec![SensorConfig::landsat8()],
        ..PipelineConfig::default()
    };
    let result = Pipeline::new(
        config,
        Box::new(ClassificationArchive::new(1..=17)),
        vec![Box::new(SceneArchive::new("LE07"))],
    );
    assert!(matches!(result, Err(StackError::InvalidConfig(_))));
}
