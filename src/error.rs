use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    StorageError(String),
    StateTransitionError(String),
    RouterError(String),
    QueueError(String),
    BatchError(String),
    UndoError(String),
    ConfigurationError(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::StorageError(msg) => write!(f, "Storage error: {msg}"),
            EngineError::StateTransitionError(msg) => write!(f, "State transition error: {msg}"),
            EngineError::RouterError(msg) => write!(f, "Router error: {msg}"),
            EngineError::QueueError(msg) => write!(f, "Queue error: {msg}"),
            EngineError::BatchError(msg) => write!(f, "Batch error: {msg}"),
            EngineError::UndoError(msg) => write!(f, "Undo error: {msg}"),
            EngineError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;
