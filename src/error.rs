use thiserror::Error;

#[derive(Debug, Error)]
pub enum PPOError {
    #[error("rollout batch has {steps} step(s); at least 2 are needed to bootstrap returns")]
    InsufficientSteps { steps: usize },

    #[error("malformed rollout batch: {0}")]
    MalformedBatch(String),

    #[error("action index {index} is out of range for dimension {dim} ({choices} choices)")]
    ActionIndexOutOfRange {
        dim: usize,
        index: i64,
        choices: usize,
    },

    #[error("got {got} action indices but the action map only has {max} dimensions")]
    TooManyActionDimensions { got: usize, max: usize },

    #[error("invalid observation batch: {0}")]
    Observation(String),

    #[error("failed to read tensor data: {0}")]
    TensorData(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("rollout worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, PPOError>;
