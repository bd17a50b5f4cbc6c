use std::path::PathBuf;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::types::ErrorResponse;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Listener could not be bound; fatal to the daemon
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Linear probe ran out of ports to try
    #[error("No free port found starting from {start} after {attempts} attempts")]
    PortsExhausted { start: u16, attempts: u32 },

    /// Filesystem failure while preparing or writing a backup
    #[error("Storage failure at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Client sent something we refuse to store
    #[error("{0}")]
    Validation(String),

    /// Upload cut off because the server stopped while it was still streaming
    #[error("Server is shutting down")]
    ShuttingDown,

    /// mDNS advertisement failure. Logged by the advertiser, never returned to clients
    #[error("Discovery failure: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client. Storage errors omit the local path
    pub fn details(&self) -> String {
        match self {
            Error::Storage { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = match &self {
            Error::Validation(_) => {
                tracing::debug!("Rejected upload: {}", self);
                "Upload failed"
            }
            _ => {
                tracing::error!("Request failed: {}", self);
                "Server error"
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}
