use std::time::Duration;

use thiserror::Error;

/// Library error type for talking to the frame backend.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured server URL (or a path joined onto it) is not a valid URL.
    #[error("invalid server url {url}: {reason}")]
    BadUrl { url: String, reason: String },

    /// The request never produced a response.
    #[error("request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Image bytes could not be decoded.
    #[error("failed to decode {filename}")]
    Decode {
        filename: String,
        #[source]
        source: image::ImageError,
    },

    /// The push channel handshake did not finish in time.
    #[error("connecting to {url} timed out after {after:?}")]
    ConnectTimeout { url: String, after: Duration },

    /// Push channel transport error.
    #[error(transparent)]
    Push(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON payload error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
