use std::fmt;

/// Result type for planner operations
pub type Result<T> = std::result::Result<T, PlannerError>;

/// Main error type for the metis planner
#[derive(Debug, Clone)]
pub enum PlannerError {
    /// Missing or malformed configuration option
    InvalidConfig {
        key: String,
        reason: String,
    },

    /// The model reported something the planner cannot interpret; a default
    /// was substituted and the search continued
    ModelInconsistency(String),

    /// An internal planner invariant was violated; the planner state can no
    /// longer be trusted
    InvariantViolation(String),

    /// Particle synthesis failed at an execution step
    ParticleDepletion {
        node: usize,
    },

    /// IO errors (map files, change files, snapshots)
    IoError(String),

    /// Snapshot encoding/decoding errors
    SerializationError(String),
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::InvalidConfig { key, reason } => {
                write!(f, "Invalid configuration '{}': {}", key, reason)
            }
            PlannerError::ModelInconsistency(msg) => {
                write!(f, "Model inconsistency: {}", msg)
            }
            PlannerError::InvariantViolation(msg) => {
                write!(f, "Planner invariant violated: {}", msg)
            }
            PlannerError::ParticleDepletion { node } => {
                write!(f, "Failed to generate new particles for belief node {}", node)
            }
            PlannerError::IoError(msg) => write!(f, "IO error: {}", msg),
            PlannerError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for PlannerError {}

impl From<std::io::Error> for PlannerError {
    fn from(err: std::io::Error) -> Self {
        PlannerError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for PlannerError {
    fn from(err: bincode::Error) -> Self {
        PlannerError::SerializationError(err.to_string())
    }
}

// Helper constructors for common error patterns
impl PlannerError {
    pub fn invalid_config<S: Into<String>>(key: S, reason: S) -> Self {
        PlannerError::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        PlannerError::InvariantViolation(msg.into())
    }
}
