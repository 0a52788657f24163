use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("unknown marker '{0}': not present in the configured marker map")]
    UnknownMarker(String),

    #[error("failed to open marker stream {stream} on {endpoint}: {message}")]
    Open {
        stream: String,
        endpoint: String,
        message: String,
    },

    #[error("failed to push marker to stream {stream}: {message}")]
    Transport { stream: String, message: String },
}

/// Why a device command did not succeed. Only used for diagnostics; callers
/// of [`crate::DeviceClient`] see a plain `false`.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not reach device: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid request url: {0}")]
    Url(String),
}
