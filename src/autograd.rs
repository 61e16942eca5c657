use std::sync::Arc;

use crate::config::CorrelationConfig;
use crate::error::Result;
use crate::ops::{correlate_backward, CorrelationOutput, InputGrads};
use crate::tensor::Tensor;

pub type GradFnRef = Arc<dyn GradFn + Send + Sync>;

/// Backward closure saved by a forward call.
pub trait GradFn {
    fn name(&self) -> &'static str;
    fn backward(&self, grad_out: &Tensor) -> Result<InputGrads>;
}

/// Saved context of one correlation: the padded inputs and the configuration.
struct CorrelationGrad {
    padded_a: Arc<Tensor>,
    padded_b: Arc<Tensor>,
    config: CorrelationConfig,
}

impl GradFn for CorrelationGrad {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn backward(&self, grad_out: &Tensor) -> Result<InputGrads> {
        correlate_backward(grad_out, &self.padded_a, &self.padded_b, &self.config)
    }
}

pub fn make_correlation_grad(output: &CorrelationOutput) -> GradFnRef {
    Arc::new(CorrelationGrad {
        padded_a: Arc::clone(&output.padded_a),
        padded_b: Arc::clone(&output.padded_b),
        config: output.config,
    })
}
