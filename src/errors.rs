use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("No video-capable media source available")]
    NoVideoSource,
    #[error("Media acquisition error: {0}")]
    MediaAcquisition(String),
    #[error("Peer connection error: {0}")]
    PeerConnection(String),
    #[error("Call view is already mounted")]
    AlreadyMounted,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallError {
    /// Whether this error came from the capture provider
    pub fn is_media_error(&self) -> bool {
        matches!(self, CallError::NoVideoSource | CallError::MediaAcquisition(_))
    }
}
