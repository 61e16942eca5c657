pub mod grad_kernels;
pub mod kernels;

use std::sync::Arc;

use log::{debug, trace};

use crate::autograd::{make_correlation_grad, GradFnRef};
use crate::config::{CorrelationConfig, Geometry};
use crate::error::{CorrelationError, Result};
use crate::telemetry::{span, CorrelationStage, TelemetryRecorder};
use crate::tensor::Tensor;
use grad_kernels::{grad_first_input, grad_second_input};
pub use kernels::KernelPath;
use kernels::{correlation_forward, pad_kernel};

/// Result of a forward correlation together with the buffers the backward pass reuses.
#[derive(Debug, Clone)]
pub struct CorrelationOutput {
    pub output: Tensor,
    pub padded_a: Arc<Tensor>,
    pub padded_b: Arc<Tensor>,
    pub config: CorrelationConfig,
    pub geometry: Geometry,
}

impl CorrelationOutput {
    pub fn grad_fn(&self) -> GradFnRef {
        make_correlation_grad(self)
    }

    pub fn backward(&self, grad_out: &Tensor) -> Result<InputGrads> {
        self.backward_recorded(grad_out, None)
    }

    pub fn backward_recorded(
        &self,
        grad_out: &Tensor,
        recorder: Option<&TelemetryRecorder>,
    ) -> Result<InputGrads> {
        correlate_backward_recorded(
            grad_out,
            &self.padded_a,
            &self.padded_b,
            &self.config,
            recorder,
        )
    }
}

/// Gradients with respect to both correlation inputs.
#[derive(Debug, Clone)]
pub struct InputGrads {
    pub grad_a: Tensor,
    pub grad_b: Tensor,
}

/// Zero-pad `input` by `pad_size` pixels on every spatial side.
pub fn pad(input: &Tensor, pad_size: usize) -> Tensor {
    let [batch, height, width, channels] = input.shape();
    // Fresh zeroed allocation; the kernel only writes the interior.
    let mut padded = Tensor::zeros([
        batch,
        height + 2 * pad_size,
        width + 2 * pad_size,
        channels,
    ]);
    pad_kernel(input.data(), input.shape(), pad_size, padded.data_mut());
    padded
}

pub fn correlate(a: &Tensor, b: &Tensor, config: &CorrelationConfig) -> Result<CorrelationOutput> {
    correlate_with_path(a, b, config, KernelPath::Specialized)
}

pub fn correlate_with_path(
    a: &Tensor,
    b: &Tensor,
    config: &CorrelationConfig,
    path: KernelPath,
) -> Result<CorrelationOutput> {
    correlate_recorded(a, b, config, path, None)
}

/// [`correlate_with_path`] that times padding and the forward kernel on `recorder`.
pub fn correlate_recorded(
    a: &Tensor,
    b: &Tensor,
    config: &CorrelationConfig,
    path: KernelPath,
    recorder: Option<&TelemetryRecorder>,
) -> Result<CorrelationOutput> {
    if a.shape() != b.shape() {
        return Err(CorrelationError::ShapeMismatch {
            op: "correlate",
            lhs: a.shape().to_vec(),
            rhs: b.shape().to_vec(),
        });
    }
    let geometry = config.geometry(a.shape())?;
    debug!(
        "correlate: input={:?} padded={:?} output={:?} staging_bytes={}",
        geometry.input_shape(),
        geometry.padded_shape(),
        geometry.output_shape(),
        geometry.staging_bytes()
    );
    trace!(
        "correlate: kernel_size={} path={:?}",
        geometry.kernel_size,
        path
    );

    let (padded_a, padded_b) = {
        let _span = span(recorder, CorrelationStage::Pad, &geometry);
        (pad(a, geometry.pad_size), pad(b, geometry.pad_size))
    };
    let mut output = Tensor::zeros(geometry.output_shape());
    {
        let _span =
            span(recorder, CorrelationStage::Forward, &geometry).map(|timer| timer.with_path(path));
        correlation_forward(
            padded_a.data(),
            padded_b.data(),
            &geometry,
            path,
            output.data_mut(),
        );
    }

    Ok(CorrelationOutput {
        output,
        padded_a: Arc::new(padded_a),
        padded_b: Arc::new(padded_b),
        config: *config,
        geometry,
    })
}

pub fn correlate_backward(
    grad_out: &Tensor,
    padded_a: &Tensor,
    padded_b: &Tensor,
    config: &CorrelationConfig,
) -> Result<InputGrads> {
    correlate_backward_recorded(grad_out, padded_a, padded_b, config, None)
}

/// [`correlate_backward`] that times each input's gradient pass on `recorder`.
pub fn correlate_backward_recorded(
    grad_out: &Tensor,
    padded_a: &Tensor,
    padded_b: &Tensor,
    config: &CorrelationConfig,
    recorder: Option<&TelemetryRecorder>,
) -> Result<InputGrads> {
    let op = "correlate_backward";
    if padded_a.shape() != padded_b.shape() {
        return Err(CorrelationError::ShapeMismatch {
            op,
            lhs: padded_a.shape().to_vec(),
            rhs: padded_b.shape().to_vec(),
        });
    }
    let [batch, padded_height, padded_width, channels] = padded_a.shape();
    let border = 2 * config.pad_size;
    if padded_height <= border || padded_width <= border {
        return Err(CorrelationError::InvalidShape {
            op,
            shape: padded_a.shape().to_vec(),
            msg: format!("padded extents must exceed twice pad_size {}", config.pad_size),
        });
    }
    let geometry = config.geometry([
        batch,
        padded_height - border,
        padded_width - border,
        channels,
    ])?;
    grad_out.ensure_shape(geometry.output_shape(), op)?;
    debug!(
        "correlate_backward: grad={:?} input={:?}",
        geometry.output_shape(),
        geometry.input_shape()
    );

    // Both passes write disjoint buffers, so their order is free.
    let mut grad_a = Tensor::zeros(geometry.input_shape());
    {
        let _span = span(recorder, CorrelationStage::GradFirstInput, &geometry);
        grad_first_input(padded_b.data(), grad_out.data(), &geometry, grad_a.data_mut());
    }
    let mut grad_b = Tensor::zeros(geometry.input_shape());
    {
        let _span = span(recorder, CorrelationStage::GradSecondInput, &geometry);
        grad_second_input(padded_a.data(), grad_out.data(), &geometry, grad_b.data_mut());
    }

    Ok(InputGrads { grad_a, grad_b })
}

/// Configuration of the PWC-Net cost volume with the given search range.
pub fn cost_volume_config(search_range: usize) -> Result<CorrelationConfig> {
    if search_range == 0 {
        return Err(CorrelationError::InvalidArgument {
            op: "cost_volume",
            msg: "search_range must be > 0".to_string(),
        });
    }
    CorrelationConfig::new(search_range, 1, search_range, 1, 1)
}

/// Channel-mean of `c1 * c2` over a (2r+1)² displacement square, zero outside the image.
///
/// Output keeps the spatial extent of the inputs; channel
/// `(dy + r) * (2r + 1) + (dx + r)` samples `c2` at `(y + dy, x + dx)`.
pub fn cost_volume(c1: &Tensor, c2: &Tensor, search_range: usize) -> Result<CorrelationOutput> {
    let config = cost_volume_config(search_range)?;
    correlate(c1, c2, &config)
}

pub fn cost_volume_backward(
    grad_out: &Tensor,
    padded_c1: &Tensor,
    padded_c2: &Tensor,
    search_range: usize,
) -> Result<InputGrads> {
    let config = cost_volume_config(search_range)?;
    correlate_backward(grad_out, padded_c1, padded_c2, &config)
}
