use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job definition ({job}): {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::Config(_) => "CONFIG_ERROR",
            WardenError::InvalidJob { .. } => "INVALID_JOB",
            WardenError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
