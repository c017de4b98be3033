use thiserror::Error;

/// Pose tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Motion sensor unavailable")]
    SensorUnavailable,

    #[error("Motion access denied")]
    AuthorizationDenied,

    #[error("Motion access restricted")]
    AuthorizationRestricted,

    #[error("Sensor error: {0}")]
    SampleDelivery(String),

    #[error("Log sink error: {0}")]
    LogSink(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Whether the error is meant to reach the user through the status line.
    /// Numeric recovery and log-sink trouble stay internal.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            TrackerError::SensorUnavailable
                | TrackerError::AuthorizationDenied
                | TrackerError::AuthorizationRestricted
                | TrackerError::SampleDelivery(_)
        )
    }

    /// Status line text for the presentation layer.
    pub fn status_text(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Io(err.to_string())
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
