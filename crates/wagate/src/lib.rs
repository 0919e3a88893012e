//! Multi-tenant messaging session gateway.
//!
//! Keeps at most one live connection per account identity, resumes sessions
//! from stored credentials, falls back to QR-code login, reconnects after
//! unexpected drops and serializes outbound sends per identity.

pub mod config;
pub mod credentials;
pub mod destination;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod manager;
pub mod message;
pub mod qr;
mod reconnect;
pub mod registry;
pub mod transport;

pub use config::GatewayConfig;
pub use credentials::{CredentialBlob, CredentialStore, FileCredentialStore};
pub use destination::{Destination, DestinationKind};
pub use dispatch::SendJitter;
pub use error::SessionError;
pub use identity::Identity;
pub use manager::{
    ConnectOptions, ConnectOutcome, ManagerOptions, RestoreReport, SessionManager, SessionStatus,
};
pub use message::{MediaKind, MessageContent, OutboundMessage, Quote};
pub use qr::{QrImage, QrRenderer, TerminalQrRenderer};
pub use registry::{ConnectionHandle, ConnectionRegistry, Phase};
pub use transport::{
    AuthOutcome, ClientInfo, ClientVersion, Connected, Connection, ConnectionEvent, SendOutcome,
    Transport, TransportConnectOptions, TransportError,
};
