//! Error types for the stepflow crate.
//!
//! Errors produced while generating steps or building the graph are
//! collected into the workflow outcome rather than raised across the
//! public boundary; the variants here are the data that ends up there.

use thiserror::Error;

/// Result type for stepflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for all stepflow operations
#[derive(Error, Debug)]
pub enum Error {
    /// A declarative step record failed validation
    #[error("Invalid step: {message}")]
    InvalidStep {
        /// What was wrong with the step definition
        message: String,
    },

    /// A `when` guard contained shell metacharacters after resolution
    #[error("Unsafe predicate: {expression}")]
    UnsafePredicate {
        /// The offending predicate expression
        expression: String,
    },

    /// The template resolver could not produce a value
    #[error("Template resolution failed: {message}")]
    TemplateResolution {
        /// What failed during resolution
        message: String,
    },

    /// The dependency graph contains a cycle
    #[error("Circular dependency detected:\n{trace}")]
    CircularDependency {
        /// Human-readable cycle trace with nodes, edges, and suggestions
        trace: String,
    },

    /// A driver reported a failed execution
    #[error("Step {node_id} failed: {message}")]
    DriverFailure {
        /// The graph node whose execution failed
        node_id: String,
        /// The driver's error output
        message: String,
    },

    /// A step exceeded its execution deadline
    #[error("Step {node_id} timed out after {timeout_seconds} seconds")]
    Timeout {
        /// The graph node that timed out
        node_id: String,
        /// The deadline that was exceeded, in seconds
        timeout_seconds: u64,
    },

    /// IO error occurred during operation
    #[error("IO error: {message}")]
    Io {
        /// Error message describing the IO failure
        message: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing or serialization error
    #[error("JSON error: {message}")]
    Json {
        /// Error message describing the JSON failure
        message: String,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Custom {
        /// Custom error message
        message: String,
    },
}

impl Error {
    /// Create a new invalid step error
    pub fn invalid_step(message: impl Into<String>) -> Self {
        Self::InvalidStep {
            message: message.into(),
        }
    }

    /// Create a new unsafe predicate error
    pub fn unsafe_predicate(expression: impl Into<String>) -> Self {
        Self::UnsafePredicate {
            expression: expression.into(),
        }
    }

    /// Create a new template resolution error
    pub fn template_resolution(message: impl Into<String>) -> Self {
        Self::TemplateResolution {
            message: message.into(),
        }
    }

    /// Create a new circular dependency error
    pub fn circular_dependency(trace: impl Into<String>) -> Self {
        Self::CircularDependency {
            trace: trace.into(),
        }
    }

    /// Create a new driver failure error
    pub fn driver_failure(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DriverFailure {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(node_id: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            node_id: node_id.into(),
            timeout_seconds,
        }
    }

    /// Create a new custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidStep { .. } => "step",
            Self::UnsafePredicate { .. } | Self::TemplateResolution { .. } => "resolution",
            Self::CircularDependency { .. } => "graph",
            Self::DriverFailure { .. } | Self::Timeout { .. } => "execution",
            Self::Io { .. } => "io",
            Self::Json { .. } => "json",
            Self::Custom { .. } => "custom",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DriverFailure { .. } | Self::Timeout { .. } | Self::Io { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: err,
        }
    }
}
