use thiserror::Error;

/// Failures surfaced by the transit data layer.
#[derive(Debug, Error)]
pub enum TransitError {
    /// Upstream answered with something other than 200.
    #[error("server error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Raised by the platform location collaborator, carried on the same channel.
    #[error("location access denied")]
    PermissionDenied,
}

impl TransitError {
    /// Status and transport failures are both network failures.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Transport(_))
    }
}
