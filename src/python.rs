use ndarray::ArrayView2;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::prelude::*;
use std::collections::BTreeMap;

use crate::core::composite::nan_median_cube;
use crate::core::extent::GeoExtent;
use crate::core::projection::Crs;
use crate::core::spectral_index;
use crate::core::zonal::{Reducer, ZonalReducer, DEFAULT_MAX_PIXELS};
use crate::types::{self, Band, GeoTransform, Raster, StackError};

fn to_py_err(e: StackError) -> PyErr {
    match e {
        StackError::InvalidConfig(_) | StackError::SchemaMismatch(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
    }
}

/// Wrap a plain array as a one-band raster on a unit grid covering the array
fn unit_raster(values: ArrayView2<f32>) -> Result<(Raster, GeoExtent), StackError> {
    let (rows, cols) = values.dim();
    let raster = Raster::new(
        vec![Band::continuous("values", values.to_owned())],
        Crs::WebMercator,
        GeoTransform::north_up(0.0, rows as f64, 1.0),
    )?;
    let extent = GeoExtent::new(Crs::WebMercator, 0.0, 0.0, cols as f64, rows as f64)?;
    Ok((raster, extent))
}

/// Per-pixel NaN-aware median over axis 0 of a (scenes, rows, cols) stack.
///
/// A stack with no scenes raises `ValueError`.
#[pyfunction]
fn median_composite<'py>(
    py: Python<'py>,
    stack: PyReadonlyArray3<f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let median = nan_median_cube(stack.as_array()).map_err(to_py_err)?;
    Ok(median.into_pyarray(py))
}

/// (a - b) / (a + b), clamped to [-1, 1], NaN where undefined
#[pyfunction]
fn normalized_difference<'py>(
    py: Python<'py>,
    a: PyReadonlyArray2<f32>,
    b: PyReadonlyArray2<f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let (a, b) = (a.as_array(), b.as_array());
    if a.dim() != b.dim() {
        return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
            "Shape mismatch: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(spectral_index::normalized_difference(a, b).into_pyarray(py))
}

/// Class value -> count over the non-NaN pixels of an array
#[pyfunction]
#[pyo3(signature = (values, max_pixels = DEFAULT_MAX_PIXELS))]
fn array_histogram(
    values: PyReadonlyArray2<f32>,
    max_pixels: u64,
) -> PyResult<BTreeMap<i32, u64>> {
    let (raster, extent) = unit_raster(values.as_array()).map_err(to_py_err)?;
    ZonalReducer::new(max_pixels)
        .histogram(&raster, "values", &extent, 1.0)
        .map_err(to_py_err)
}

/// Named statistics over the non-NaN pixels of an array
#[pyfunction]
#[pyo3(signature = (values, reducers, max_pixels = DEFAULT_MAX_PIXELS))]
fn array_stats(
    values: PyReadonlyArray2<f32>,
    reducers: Vec<String>,
    max_pixels: u64,
) -> PyResult<BTreeMap<String, Option<f64>>> {
    let reducers = reducers
        .iter()
        .map(|name| name.parse::<Reducer>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(to_py_err)?;
    let (raster, extent) = unit_raster(values.as_array()).map_err(to_py_err)?;
    ZonalReducer::new(max_pixels)
        .statistics(&raster, "values", &extent, 1.0, &reducers)
        .map_err(to_py_err)
}

#[pyfunction]
fn igbp_class_name(code: i32) -> Option<&'static str> {
    types::igbp_class_name(code)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(median_composite, m)?)?;
    m.add_function(wrap_pyfunction!(normalized_difference, m)?)?;
    m.add_function(wrap_pyfunction!(array_histogram, m)?)?;
    m.add_function(wrap_pyfunction!(array_stats, m)?)?;
    m.add_function(wrap_pyfunction!(igbp_class_name, m)?)?;
    Ok(())
}
