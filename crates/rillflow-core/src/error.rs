use thiserror::Error;

/// Core error type for the Rillflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Flow object or process instance lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Two flow objects in one definition share a name
    #[error("Duplicate flow object name: {0}")]
    DuplicateName(String),

    /// Structural problem in a process definition
    #[error("Invalid process definition: {0}")]
    InvalidDefinition(String),

    /// No outgoing flow of a diverging exclusive gateway matched
    #[error("Exclusive gateway resolution failed: {0}")]
    GatewayResolution(String),

    /// A getTimeout handler returned something other than a number
    #[error("Invalid timeout value: {0}")]
    InvalidTimeout(String),

    /// A handler invocation failed
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),

    /// The instance is not in a state to handle the signal
    #[error("Wrong process state: {0}")]
    WrongProcessState(String),

    /// Persistence gateway error
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::Other(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::Other(err.to_string())
    }
}
