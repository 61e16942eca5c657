#![cfg(feature = "python-bindings")]

use ndarray::ArrayD;
use numpy::{IntoPyArray, PyArrayDyn, PyReadonlyArrayDyn};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::CorrelationConfig;
use crate::ops;
use crate::tensor::Tensor;

type PyArrayTriple<'py> = (&'py PyArrayDyn<f32>, &'py PyArrayDyn<f32>, &'py PyArrayDyn<f32>);

#[pymodule]
pub fn flowcorr(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(correlate, m)?)?;
    m.add_function(wrap_pyfunction!(correlate_backward, m)?)?;
    Ok(())
}

fn to_py_err(err: crate::CorrelationError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn tensor_from_array(array: PyReadonlyArrayDyn<f32>) -> PyResult<Tensor> {
    let shape: [usize; 4] = array.shape().try_into().map_err(|_| {
        PyValueError::new_err(format!("expected an NHWC array, got shape {:?}", array.shape()))
    })?;
    let data = array.as_array().iter().cloned().collect();
    Tensor::try_from_vec(data, shape).map_err(to_py_err)
}

fn tensor_to_array<'py>(py: Python<'py>, tensor: &Tensor) -> PyResult<&'py PyArrayDyn<f32>> {
    let array = ArrayD::from_shape_vec(tensor.shape().to_vec(), tensor.data().to_vec())
        .map_err(|err| PyValueError::new_err(err.to_string()))?;
    Ok(array.into_pyarray(py))
}

#[pyfunction]
#[pyo3(signature = (a, b, pad_size, kernel_size, max_displacement, stride_1, stride_2))]
fn correlate<'py>(
    py: Python<'py>,
    a: PyReadonlyArrayDyn<f32>,
    b: PyReadonlyArrayDyn<f32>,
    pad_size: usize,
    kernel_size: usize,
    max_displacement: usize,
    stride_1: usize,
    stride_2: usize,
) -> PyResult<PyArrayTriple<'py>> {
    let config = CorrelationConfig::new(pad_size, kernel_size, max_displacement, stride_1, stride_2)
        .map_err(to_py_err)?;
    let a = tensor_from_array(a)?;
    let b = tensor_from_array(b)?;
    let result = py
        .allow_threads(|| ops::correlate(&a, &b, &config))
        .map_err(to_py_err)?;
    Ok((
        tensor_to_array(py, &result.output)?,
        tensor_to_array(py, &result.padded_a)?,
        tensor_to_array(py, &result.padded_b)?,
    ))
}

#[pyfunction]
#[pyo3(signature = (grad, padded_a, padded_b, pad_size, kernel_size, max_displacement, stride_1, stride_2))]
fn correlate_backward<'py>(
    py: Python<'py>,
    grad: PyReadonlyArrayDyn<f32>,
    padded_a: PyReadonlyArrayDyn<f32>,
    padded_b: PyReadonlyArrayDyn<f32>,
    pad_size: usize,
    kernel_size: usize,
    max_displacement: usize,
    stride_1: usize,
    stride_2: usize,
) -> PyResult<(&'py PyArrayDyn<f32>, &'py PyArrayDyn<f32>)> {
    let config = CorrelationConfig::new(pad_size, kernel_size, max_displacement, stride_1, stride_2)
        .map_err(to_py_err)?;
    let grad = tensor_from_array(grad)?;
    let padded_a = tensor_from_array(padded_a)?;
    let padded_b = tensor_from_array(padded_b)?;
    let grads = py
        .allow_threads(|| ops::correlate_backward(&grad, &padded_a, &padded_b, &config))
        .map_err(to_py_err)?;
    Ok((
        tensor_to_array(py, &grads.grad_a)?,
        tensor_to_array(py, &grads.grad_b)?,
    ))
}
