use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CorrelationError {
    #[error("{op}: invalid configuration: {msg}")]
    InvalidConfig { op: &'static str, msg: String },
    #[error("{op}: shape mismatch: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    #[error("{op}: invalid shape {shape:?}: {msg}")]
    InvalidShape {
        op: &'static str,
        shape: Vec<usize>,
        msg: String,
    },
    #[error("{op}: {msg}")]
    InvalidArgument { op: &'static str, msg: String },
}

pub type Result<T> = std::result::Result<T, CorrelationError>;
