use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::identity::Identity;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("connection is invalid for {}", .0.masked())]
    InvalidConnection(Identity),

    #[error("qr handshake timed out after {}s", .0.as_secs())]
    HandshakeTimeout(Duration),

    #[error("no stored credential for {}", .0.masked())]
    CredentialNotFound(Identity),

    #[error("restore rejected for {}: {reason}", .identity.masked())]
    RestoreRejected { identity: Identity, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("credential store I/O error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt credential file at {path}: {message}")]
    CorruptCredential { path: PathBuf, message: String },

    #[error("qr render failed: {0}")]
    QrRender(String),

    #[error("session manager is shut down")]
    ShuttingDown,
}

impl SessionError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code for an outer API layer.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InvalidIdentity(_) => "invalid_identity",
            SessionError::InvalidDestination(_) => "invalid_destination",
            SessionError::InvalidMessage(_) => "invalid_message",
            SessionError::InvalidConnection(_) => "invalid_connection",
            SessionError::HandshakeTimeout(_) => "handshake_timeout",
            SessionError::CredentialNotFound(_) => "credential_not_found",
            SessionError::RestoreRejected { .. } => "restore_rejected",
            SessionError::Transport(_) => "transport_error",
            SessionError::Persistence { .. } | SessionError::CorruptCredential { .. } => {
                "persistence_error"
            }
            SessionError::QrRender(_) => "qr_render_failed",
            SessionError::ShuttingDown => "shutting_down",
        }
    }

    /// Whether the failure came from the caller's input rather than the gateway.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidIdentity(_)
                | SessionError::InvalidDestination(_)
                | SessionError::InvalidMessage(_)
                | SessionError::InvalidConnection(_)
        )
    }
}
