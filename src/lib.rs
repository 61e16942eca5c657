pub mod autograd;
pub mod config;
pub mod data;
pub mod error;
pub mod ops;
pub mod storage;
pub mod telemetry;
pub mod tensor;

#[cfg(feature = "python-bindings")]
pub mod py;

pub use autograd::{GradFn, GradFnRef};
pub use config::{CorrelationConfig, Geometry};
pub use data::{make_shifted_pair, random_tensor, FeaturePair, SyntheticPairConfig};
pub use error::{CorrelationError, Result};
pub use ops::{
    correlate, correlate_backward, correlate_backward_recorded, correlate_recorded, cost_volume,
    cost_volume_backward, CorrelationOutput, InputGrads, KernelPath,
};
pub use telemetry::{CorrelationStage, StageEvent, TelemetryRecorder};
pub use tensor::Tensor;
