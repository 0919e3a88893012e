//! Session connection manager: login/restore state machine and the
//! caller-facing session operations.
//!
//! Connecting an identity runs in its own task so that a caller who stops
//! waiting (e.g. an HTTP client that hangs up after receiving the QR code)
//! does not abort the handshake. The task holds the identity's lock for the
//! whole attempt; a second concurrent connect for the same identity waits
//! and then observes the first one's result.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::credentials::{CredentialBlob, CredentialStore};
use crate::dispatch::SendJitter;
use crate::error::SessionError;
use crate::identity::Identity;
use crate::qr::{self, QrImage, QrRenderer};
use crate::reconnect;
use crate::registry::{
    ConnectionHandle, ConnectionRegistry, Phase, ReconnectPolicy, RegistryEntry,
};
use crate::transport::{
    AuthOutcome, ClientInfo, Connected, ConnectionEvent, Transport, TransportConnectOptions,
    TransportError,
};

/// Per-call connect settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// QR handshake budget, also passed to the transport as its timeout.
    pub timeout: Duration,
    /// Wait before an in-place restore after an unexpected disconnect.
    pub reconnect_cooldown: Duration,
}

impl ConnectOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            timeout: config.login_timeout(),
            reconnect_cooldown: config.reconnect_cooldown(),
        }
    }
}

/// Process-wide manager settings.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub client: ClientInfo,
    pub scan_timeout: Duration,
    pub send_jitter: SendJitter,
}

impl ManagerOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let (min, max) = config.send_jitter();
        Self {
            client: config.client.clone(),
            scan_timeout: config.scan_timeout(),
            send_jitter: SendJitter::new(min, max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A live connection already existed.
    AlreadyConnected,
    /// Resumed from the stored credential without a QR scan.
    Restored,
    /// Interactive login finished without needing a scan.
    Authenticated,
    /// Scan this code; the login completes in the background.
    QrCode(QrImage),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub identity: Identity,
    pub handle_id: Uuid,
    pub phase: Phase,
    pub connected_at_ms: Option<u64>,
    pub last_seen_ms: u64,
    pub has_credential: bool,
}

/// Result of restoring every stored session at startup.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<Identity>,
    pub failed: Vec<(Identity, SessionError)>,
}

pub(crate) struct Shared {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) renderer: Arc<dyn QrRenderer>,
    pub(crate) options: ManagerOptions,
    pub(crate) shutdown: CancellationToken,
}

/// Registry of live sessions plus the operations callers use on them.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) shared: Arc<Shared>,
}

type ConnectReport = oneshot::Sender<Result<ConnectOutcome, SessionError>>;

/// Delivers the first result of a connect attempt to its caller.
struct Reporter(Option<ConnectReport>);

impl Reporter {
    fn report(&mut self, result: Result<ConnectOutcome, SessionError>) -> bool {
        match self.0.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

impl SessionManager {
    pub fn new(
        options: ManagerOptions,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        renderer: Arc<dyn QrRenderer>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: ConnectionRegistry::new(),
                store,
                transport,
                renderer,
                options,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.shared.registry
    }

    /// Connect `identity`: reuse a live connection, else restore from the
    /// stored credential, else fall back to a QR login.
    pub async fn connect_identity(
        &self,
        identity: &str,
        options: ConnectOptions,
    ) -> Result<ConnectOutcome, SessionError> {
        self.spawn_connect(Identity::parse(identity)?, options, true)
            .await
    }

    /// Resume `identity` from its stored credential only; never shows a QR.
    pub async fn restore_identity(
        &self,
        identity: &str,
        options: ConnectOptions,
    ) -> Result<ConnectOutcome, SessionError> {
        self.spawn_connect(Identity::parse(identity)?, options, false)
            .await
    }

    async fn spawn_connect(
        &self,
        identity: Identity,
        options: ConnectOptions,
        allow_login: bool,
    ) -> Result<ConnectOutcome, SessionError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(SessionError::ShuttingDown);
        }
        if self.shared.registry.is_connected(&identity) {
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_connect(shared, identity, options, Reporter(Some(tx)), allow_login).await;
        });

        rx.await.unwrap_or_else(|_| {
            Err(SessionError::Transport(TransportError::Io(
                "connect task ended without a result".to_string(),
            )))
        })
    }

    /// Restore every identity that has a stored credential (process startup).
    pub async fn restore_stored_sessions(
        &self,
        options: ConnectOptions,
    ) -> Result<RestoreReport, SessionError> {
        let mut report = RestoreReport::default();
        for identity in self.shared.store.list()? {
            tracing::info!(identity = %identity.masked(), "restoring stored session");
            match self.restore_identity(identity.as_str(), options).await {
                Ok(_) => report.restored.push(identity),
                Err(e) => {
                    tracing::warn!(identity = %identity.masked(), error = %e, "failed to restore session");
                    report.failed.push((identity, e));
                }
            }
        }
        Ok(report)
    }

    /// Log out, close the connection and forget the stored credential.
    pub async fn logout_identity(&self, identity: &str) -> Result<(), SessionError> {
        let identity = Identity::parse(identity)?;
        if self.shared.registry.get(&identity).is_none() {
            return Err(SessionError::InvalidConnection(identity));
        }

        let lock = self.shared.registry.lock_for(&identity);
        let _guard = lock.lock().await;

        let Some(entry) = self.shared.registry.remove(&identity) else {
            return Err(SessionError::InvalidConnection(identity));
        };
        let connection = entry.handle.connection();
        let result = connection.logout().await;
        connection.disconnect().await;
        result?;

        self.shared.store.delete(&identity)?;
        tracing::info!(identity = %identity.masked(), "session logged out");
        Ok(())
    }

    /// Ping the live connection; a closed connection is evicted.
    pub async fn check_liveness(&self, identity: &str) -> Result<(), SessionError> {
        let identity = Identity::parse(identity)?;
        if !self.shared.registry.is_connected(&identity) {
            return Err(SessionError::InvalidConnection(identity));
        }

        let lock = self.shared.registry.lock_for(&identity);
        let _guard = lock.lock().await;

        let Some(entry) = self.shared.registry.get_live(&identity) else {
            return Err(SessionError::InvalidConnection(identity));
        };
        match entry.handle.connection().test_liveness().await {
            Ok(()) => {
                self.shared.registry.touch(&identity, entry.handle.id());
                Ok(())
            }
            Err(TransportError::Closed) => {
                reconnect::evict_locked(&self.shared, &identity, entry.handle.id(), "liveness check")
                    .await;
                Err(TransportError::Closed.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn status(&self, identity: &str) -> Result<Option<SessionStatus>, SessionError> {
        let identity = Identity::parse(identity)?;
        let has_credential = self.shared.store.exists(&identity);
        Ok(self
            .shared
            .registry
            .get(&identity)
            .map(|entry| SessionStatus {
                handle_id: entry.handle.id(),
                phase: entry.phase,
                connected_at_ms: entry.connected_at_ms,
                last_seen_ms: entry.last_seen_ms,
                has_credential,
                identity,
            }))
    }

    pub fn connected_identities(&self) -> Vec<Identity> {
        self.shared.registry.live_identities()
    }

    /// Stop every reconnection watcher and close every connection.
    ///
    /// Stored credentials are kept so the next process can restore them.
    /// Later connects fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        for identity in self.shared.registry.identities() {
            let lock = self.shared.registry.lock_for(&identity);
            let _guard = lock.lock().await;
            if let Some(entry) = self.shared.registry.remove(&identity) {
                entry.handle.connection().disconnect().await;
            }
        }
        tracing::info!("session manager shut down");
    }
}

async fn run_connect(
    shared: Arc<Shared>,
    identity: Identity,
    options: ConnectOptions,
    mut reporter: Reporter,
    allow_login: bool,
) {
    let lock = shared.registry.lock_for(&identity);
    let _guard = lock.lock().await;

    // Entries installed now would get an already-cancelled watcher.
    if shared.shutdown.is_cancelled() {
        reporter.report(Err(SessionError::ShuttingDown));
        return;
    }
    if shared.registry.is_connected(&identity) {
        reporter.report(Ok(ConnectOutcome::AlreadyConnected));
        return;
    }
    // Only an attempt holding this lock installs entries, so anything left
    // over is from an attempt that died mid-flight.
    if let Some(stale) = shared.registry.remove(&identity) {
        stale.handle.connection().disconnect().await;
    }

    let result = establish(&shared, &identity, options, &mut reporter, allow_login).await;
    match result {
        Ok(outcome) => {
            tracing::info!(identity = %identity.masked(), outcome = outcome_label(&outcome), "session connected");
            reporter.report(Ok(outcome));
        }
        Err(e) => {
            tracing::warn!(identity = %identity.masked(), error = %e, "session connect failed");
            reporter.report(Err(e));
        }
    }
}

fn outcome_label(outcome: &ConnectOutcome) -> &'static str {
    match outcome {
        ConnectOutcome::AlreadyConnected => "already_connected",
        ConnectOutcome::Restored => "restored",
        ConnectOutcome::Authenticated => "authenticated",
        ConnectOutcome::QrCode(_) => "qr_code",
    }
}

async fn establish(
    shared: &Arc<Shared>,
    identity: &Identity,
    options: ConnectOptions,
    reporter: &mut Reporter,
    allow_login: bool,
) -> Result<ConnectOutcome, SessionError> {
    let transport_options = TransportConnectOptions {
        timeout: options.timeout,
        client: shared.options.client.clone(),
    };

    match shared.store.load(identity) {
        Ok(blob) => match restore(shared, identity, &transport_options, options, &blob).await {
            Ok(()) => return Ok(ConnectOutcome::Restored),
            // The stale credential stays on disk until a login replaces it.
            Err(e @ (SessionError::RestoreRejected { .. } | SessionError::Transport(_))) => {
                if !allow_login {
                    return Err(e);
                }
                tracing::warn!(identity = %identity.masked(), error = %e, "restore failed, falling back to qr login");
            }
            Err(e) => return Err(e),
        },
        Err(SessionError::CredentialNotFound(_)) if allow_login => {
            tracing::debug!(identity = %identity.masked(), "no stored credential");
        }
        Err(e @ SessionError::CorruptCredential { .. }) if allow_login => {
            tracing::warn!(identity = %identity.masked(), error = %e, "ignoring unreadable credential");
        }
        Err(e) => return Err(e),
    }

    login(shared, identity, &transport_options, options, reporter).await
}

async fn restore(
    shared: &Arc<Shared>,
    identity: &Identity,
    transport_options: &TransportConnectOptions,
    options: ConnectOptions,
    blob: &CredentialBlob,
) -> Result<(), SessionError> {
    let Connected { connection, events } = shared
        .transport
        .connect(identity, transport_options)
        .await?;
    let handle = install_connecting(shared, identity, ConnectionHandle::new(connection), options)?;
    let connection = handle.connection().clone();

    let fresh = match connection.restore(blob).await {
        Ok(AuthOutcome::Authenticated(fresh)) => Some(fresh),
        Ok(AuthOutcome::AlreadyAuthenticated) => None,
        Err(e) => {
            discard(shared, identity, &handle).await;
            return Err(SessionError::RestoreRejected {
                identity: identity.clone(),
                reason: e.to_string(),
            });
        }
    };

    if let Err(e) = connection.test_liveness().await {
        discard(shared, identity, &handle).await;
        return Err(SessionError::RestoreRejected {
            identity: identity.clone(),
            reason: format!("liveness check failed: {e}"),
        });
    }

    if let Some(fresh) = fresh
        && let Err(e) = shared.store.save(identity, &fresh)
    {
        discard(shared, identity, &handle).await;
        return Err(e);
    }

    go_live(shared, identity, &handle, events);
    Ok(())
}

async fn login(
    shared: &Arc<Shared>,
    identity: &Identity,
    transport_options: &TransportConnectOptions,
    options: ConnectOptions,
    reporter: &mut Reporter,
) -> Result<ConnectOutcome, SessionError> {
    let Connected { connection, events } = shared
        .transport
        .connect(identity, transport_options)
        .await?;
    let handle = install_connecting(shared, identity, ConnectionHandle::new(connection), options)?;
    let connection = handle.connection().clone();

    let (qr_tx, qr_rx) = oneshot::channel();
    let mut attempt = connection.login(qr_tx);
    let mut qr_wait = Box::pin(qr::await_qr(
        qr_rx,
        options.timeout,
        shared.renderer.as_ref(),
    ));

    let mut qr_shown = false;
    let result = tokio::select! {
        finished = &mut attempt => finished.map_err(SessionError::from),
        image = &mut qr_wait => match image {
            Ok(image) => {
                qr_shown = true;
                tracing::info!(identity = %identity.masked(), "qr code ready, waiting for scan");
                reporter.report(Ok(ConnectOutcome::QrCode(image)));
                let scan_timeout = shared.options.scan_timeout;
                match tokio::time::timeout(scan_timeout, &mut attempt).await {
                    Ok(finished) => finished.map_err(SessionError::from),
                    Err(_) => Err(SessionError::HandshakeTimeout(scan_timeout)),
                }
            }
            Err(e) => Err(e),
        },
    };
    // Abandon the login before closing the connection under it.
    drop(qr_wait);
    drop(attempt);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            discard(shared, identity, &handle).await;
            return Err(e);
        }
    };

    if let AuthOutcome::Authenticated(blob) = &outcome
        && let Err(e) = shared.store.save(identity, blob)
    {
        discard(shared, identity, &handle).await;
        return Err(e);
    }

    go_live(shared, identity, &handle, events);
    if qr_shown {
        tracing::info!(identity = %identity.masked(), "qr code scanned, session live");
    }
    Ok(ConnectOutcome::Authenticated)
}

fn install_connecting(
    shared: &Arc<Shared>,
    identity: &Identity,
    handle: ConnectionHandle,
    options: ConnectOptions,
) -> Result<ConnectionHandle, SessionError> {
    let entry = RegistryEntry::connecting(
        handle.clone(),
        ReconnectPolicy {
            cooldown: options.reconnect_cooldown,
        },
        shared.shutdown.child_token(),
    );
    if !shared.registry.put(identity.clone(), entry) {
        tracing::error!(identity = %identity.masked(), "registry slot taken during connect");
        return Err(SessionError::InvalidConnection(identity.clone()));
    }
    Ok(handle)
}

fn go_live(
    shared: &Arc<Shared>,
    identity: &Identity,
    handle: &ConnectionHandle,
    events: mpsc::Receiver<ConnectionEvent>,
) {
    shared.registry.set_phase(identity, handle.id(), Phase::Live);
    reconnect::spawn_watcher(shared.clone(), identity.clone(), handle.id(), events);
}

async fn discard(shared: &Arc<Shared>, identity: &Identity, handle: &ConnectionHandle) {
    shared.registry.remove_handle(identity, handle.id());
    handle.connection().disconnect().await;
}
