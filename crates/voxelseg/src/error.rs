use thiserror::Error;
use voxelseg_core::TensorError;

/// Model-level error type.
///
/// Shape failures inside the computation graph surface as `Tensor` errors;
/// the other variants are construction-time configuration failures and the
/// bottleneck depth invariant.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bottleneck output depth must be 1, got {depth}")]
    BottleneckDepth { depth: usize },
}

pub type ModelResult<T> = Result<T, ModelError>;
