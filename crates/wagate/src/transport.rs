//! Capability interface consumed from the underlying messaging transport.
//!
//! The wire protocol itself lives outside this crate. Implementations report
//! the two sentinel outcomes the protocol is known for ("already logged in"
//! and "sending timed out") as typed variants rather than error text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::credentials::CredentialBlob;
use crate::identity::Identity;
use crate::message::OutboundMessage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer or socket closed the connection.
    #[error("connection closed")]
    Closed,

    /// The server refused a login or restore.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("operation timed out")]
    Timeout,

    #[error("i/o failure: {0}")]
    Io(String),
}

/// Successful result of a login or restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(CredentialBlob),
    /// The session was already valid; nothing new to persist.
    AlreadyAuthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(String),
    /// No acknowledgement before the transport's deadline. The message may
    /// still have been delivered.
    TimedOut(String),
}

/// Asynchronous fault notifications emitted by a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Closed { reason: String },
    Failed { reason: String },
    /// Non-fatal error reported by the connection.
    Error { message: String },
}

impl ConnectionEvent {
    /// Whether the event means the session dropped.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ConnectionEvent::Closed { .. } | ConnectionEvent::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

/// How this gateway introduces itself to the messaging network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default = "default_long_name")]
    pub long_name: String,
    #[serde(default = "default_short_name")]
    pub short_name: String,
    /// Pinned protocol client version; `None` lets the transport negotiate.
    #[serde(default)]
    pub version: Option<ClientVersion>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            long_name: default_long_name(),
            short_name: default_short_name(),
            version: None,
        }
    }
}

fn default_long_name() -> String {
    "wagate".to_string()
}

fn default_short_name() -> String {
    "wagate".to_string()
}

#[derive(Debug, Clone)]
pub struct TransportConnectOptions {
    pub timeout: Duration,
    pub client: ClientInfo,
}

/// A freshly opened connection plus its fault notification channel.
pub struct Connected {
    pub connection: Arc<dyn Connection>,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Opens connection objects; one per connection attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        identity: &Identity,
        options: &TransportConnectOptions,
    ) -> Result<Connected, TransportError>;
}

/// One transport session for one identity.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Interactive login. The transport sends exactly one QR payload on
    /// `qr` once the handshake starts, then completes when it is scanned.
    async fn login(&self, qr: oneshot::Sender<String>) -> Result<AuthOutcome, TransportError>;

    async fn restore(&self, credentials: &CredentialBlob) -> Result<AuthOutcome, TransportError>;

    async fn logout(&self) -> Result<(), TransportError>;

    async fn send(&self, message: &OutboundMessage) -> Result<SendOutcome, TransportError>;

    async fn test_liveness(&self) -> Result<(), TransportError>;

    /// Close the socket. Never fails; closing twice is harmless.
    async fn disconnect(&self);
}
