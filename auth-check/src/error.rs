use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Check canceled")]
    Canceled,

    #[error("Check deadline exceeded")]
    DeadlineExceeded,

    #[error("Failed to expand {node}: {source}")]
    Expansion {
        node: String,
        #[source]
        source: Box<CheckError>,
    },

    #[error("Malformed string input: {0}")]
    MalformedInput(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl CheckError {
    /// Wraps a collaborator failure with the graph node that was being expanded.
    pub fn expansion(node: impl ToString, source: CheckError) -> Self {
        Self::Expansion {
            node: node.to_string(),
            source: Box::new(source),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// Errors caused by the caller's input rather than by the engine.
    pub fn is_bad_request(&self) -> bool {
        match self {
            Self::MalformedInput(_) => true,
            Self::Expansion { source, .. } => source.is_bad_request(),
            _ => false,
        }
    }
}

pub type Result<T, E = CheckError> = std::result::Result<T, E>;
