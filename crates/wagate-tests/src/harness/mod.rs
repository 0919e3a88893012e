pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use wagate::{
    ClientInfo, ConnectOptions, CredentialBlob, CredentialStore, FileCredentialStore, Identity,
    ManagerOptions, QrImage, QrRenderer, SendJitter, SessionError, SessionManager,
};

use transport::ScriptedTransport;

pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(60);
pub const COOLDOWN: Duration = Duration::from_secs(30);

/// Renders the QR payload verbatim so tests can assert on it.
pub struct PayloadRenderer;

impl QrRenderer for PayloadRenderer {
    fn render(&self, payload: &str) -> Result<QrImage, SessionError> {
        Ok(QrImage {
            content_type: "text/plain".to_string(),
            bytes: payload.as_bytes().to_vec(),
        })
    }
}

/// A session manager wired to a scripted transport and a temp credential store.
pub struct TestGateway {
    pub manager: SessionManager,
    pub transport: ScriptedTransport,
    pub store: Arc<FileCredentialStore>,
    _dir: TempDir,
}

impl TestGateway {
    pub fn new() -> Result<Self> {
        Self::with_jitter(SendJitter::none())
    }

    /// Like [`TestGateway::new`] but pausing `send_jitter` before every send.
    pub fn with_jitter(send_jitter: SendJitter) -> Result<Self> {
        let dir = TempDir::new()?;
        let store = Arc::new(FileCredentialStore::open(dir.path().join("sessions"))?);
        let transport = ScriptedTransport::new();
        let options = ManagerOptions {
            client: ClientInfo::default(),
            scan_timeout: SCAN_TIMEOUT,
            send_jitter,
        };
        let manager = SessionManager::new(
            options,
            Arc::new(transport.clone()),
            store.clone(),
            Arc::new(PayloadRenderer),
        );
        Ok(Self {
            manager,
            transport,
            store,
            _dir: dir,
        })
    }

    pub fn options() -> ConnectOptions {
        ConnectOptions {
            timeout: LOGIN_TIMEOUT,
            reconnect_cooldown: COOLDOWN,
        }
    }

    /// Store a credential for `identity` as if a previous login had saved it.
    pub fn seed_credential(&self, identity: &str, blob: &[u8]) -> Result<()> {
        self.store
            .save(&Identity::parse(identity)?, &CredentialBlob::new(blob.to_vec()))?;
        Ok(())
    }

    pub fn stored_credential(&self, identity: &str) -> Option<Vec<u8>> {
        let identity = Identity::parse(identity).ok()?;
        self.store
            .load(&identity)
            .ok()
            .map(|blob| blob.as_bytes().to_vec())
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        Identity::parse(identity)
            .map(|identity| self.manager.registry().is_connected(&identity))
            .unwrap_or(false)
    }
}

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("wagate=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
