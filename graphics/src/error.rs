//! Frame execution error types.

use frameflow_core::pool::PoolError;

use crate::backend::DeviceError;
use crate::command::{CommandListKind, ListCapabilities};
use crate::graph::GraphError;

/// Result alias used throughout the crate.
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors that can occur while building or executing a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A pool or heap ran out of space and could not grow.
    #[error("allocation exhausted: {0}")]
    AllocationExhausted(String),
    /// A task bound the wrong kind of parameter, or one missing from the layout.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),
    /// Conflicting or malformed resource usage.
    #[error("invalid resource usage: {0}")]
    InvalidUsage(String),
    /// A command was recorded on a list that cannot execute it.
    #[error("{kind:?} command list lacks {required:?} capability")]
    MissingCapability {
        kind: CommandListKind,
        required: ListCapabilities,
    },
    /// A binding layout does not fit in the root table budget.
    #[error("binding layout needs {required} words, budget is {budget}")]
    CapacityExceeded { required: u32, budget: u32 },
    /// The node or task graph is malformed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The device stopped responding. Fence wait timeouts end up here too.
    #[error("device lost: {0}")]
    DeviceLost(String),
    /// Resources could not be made resident.
    #[error("residency failure: {0}")]
    ResidencyFailure(String),
    /// Any other device failure.
    #[error("device error: {0}")]
    Device(DeviceError),
    /// A task body panicked.
    #[error("task '{task}' panicked")]
    TaskPanicked { task: String },
}

impl FrameError {
    /// Whether the error leaves the device unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

impl From<DeviceError> for FrameError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::DeviceLost => Self::DeviceLost("device removed".to_string()),
            DeviceError::Timeout { value, waited } => Self::DeviceLost(format!(
                "fence wait for value {value} timed out after {waited:?}"
            )),
            other => Self::Device(other),
        }
    }
}

impl From<PoolError> for FrameError {
    fn from(err: PoolError) -> Self {
        Self::AllocationExhausted(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = FrameError::CapacityExceeded {
            required: 70,
            budget: 64,
        };
        assert_eq!(err.to_string(), "binding layout needs 70 words, budget is 64");

        let err = FrameError::InvalidBinding("texture t0 not in layout".to_string());
        assert_eq!(err.to_string(), "invalid binding: texture t0 not in layout");
    }

    #[test]
    fn test_timeout_is_device_loss() {
        let err = FrameError::from(DeviceError::Timeout {
            value: 3,
            waited: Duration::from_millis(5),
        });
        assert!(err.is_fatal());
        assert!(!FrameError::from(DeviceError::OutOfMemory).is_fatal());
    }

    #[test]
    fn test_pool_exhaustion_maps_to_allocation_exhausted() {
        let err = FrameError::from(PoolError::Exhausted { size: 4 });
        assert!(matches!(err, FrameError::AllocationExhausted(_)));
    }
}
