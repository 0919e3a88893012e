//! In-memory transport whose behavior each test scripts up front.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use wagate::{
    AuthOutcome, Connected, Connection, ConnectionEvent, CredentialBlob, Identity,
    OutboundMessage, SendOutcome, Transport, TransportConnectOptions, TransportError,
};

/// How an interactive login plays out.
#[derive(Debug, Clone)]
pub struct LoginScript {
    /// When to emit the QR payload; `None` never emits one.
    pub qr_after: Option<Duration>,
    pub payload: String,
    /// Time from login start (or from the QR, if one is emitted) until the
    /// login resolves; `None` hangs forever.
    pub complete_after: Option<Duration>,
    pub outcome: Result<AuthOutcome, TransportError>,
}

impl LoginScript {
    /// Shows a QR after `qr_after`, then authenticates `scan_after` later.
    pub fn scanned(qr_after: Duration, scan_after: Duration, blob: &[u8]) -> Self {
        Self {
            qr_after: Some(qr_after),
            payload: "2@scripted-ref,scripted-key".to_string(),
            complete_after: Some(scan_after),
            outcome: Ok(AuthOutcome::Authenticated(CredentialBlob::new(blob.to_vec()))),
        }
    }

    /// Never shows a QR and never finishes.
    pub fn silent() -> Self {
        Self {
            qr_after: None,
            payload: String::new(),
            complete_after: None,
            outcome: Err(TransportError::Timeout),
        }
    }

    /// Finishes immediately without a QR.
    pub fn already_authenticated() -> Self {
        Self {
            qr_after: None,
            payload: String::new(),
            complete_after: Some(Duration::ZERO),
            outcome: Ok(AuthOutcome::AlreadyAuthenticated),
        }
    }
}

impl Default for LoginScript {
    fn default() -> Self {
        Self::silent()
    }
}

/// When one transport send started and returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSpan {
    pub started: Instant,
    pub finished: Instant,
}

/// What the transport records and replays.
#[derive(Default)]
struct ScriptState {
    connect_delay: Duration,
    connect_errors: VecDeque<TransportError>,
    login: LoginScript,
    restore_results: VecDeque<Result<AuthOutcome, TransportError>>,
    liveness_results: VecDeque<Result<(), TransportError>>,
    send_results: VecDeque<Result<SendOutcome, TransportError>>,
    logout_result: Option<TransportError>,
    send_delay: Duration,

    connects: usize,
    logins: usize,
    restores: Vec<Vec<u8>>,
    logouts: usize,
    disconnects: usize,
    sent: Vec<OutboundMessage>,
    send_spans: Vec<SendSpan>,
    events: Vec<mpsc::Sender<ConnectionEvent>>,
    parked_qr: Vec<oneshot::Sender<String>>,
}

/// Scripted [`Transport`]; clones share one script.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    pub fn fail_next_connect(&self, error: TransportError) {
        self.state().connect_errors.push_back(error);
    }

    pub fn set_login(&self, script: LoginScript) {
        self.state().login = script;
    }

    /// Queue the result of the next restore; unqueued restores succeed with
    /// `AlreadyAuthenticated`.
    pub fn push_restore(&self, result: Result<AuthOutcome, TransportError>) {
        self.state().restore_results.push_back(result);
    }

    pub fn push_liveness(&self, result: Result<(), TransportError>) {
        self.state().liveness_results.push_back(result);
    }

    /// Queue the result of the next send; unqueued sends succeed.
    pub fn push_send(&self, result: Result<SendOutcome, TransportError>) {
        self.state().send_results.push_back(result);
    }

    /// Every send takes `delay` before returning.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state().send_delay = delay;
    }

    pub fn fail_logout(&self, error: TransportError) {
        self.state().logout_result = Some(error);
    }

    /// Deliver `event` on the most recently opened connection.
    pub fn emit(&self, event: ConnectionEvent) {
        let sender = self.state().events.last().cloned();
        if let Some(sender) = sender {
            sender.try_send(event).ok();
        }
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn logins(&self) -> usize {
        self.state().logins
    }

    /// Credential bytes handed to each restore, in order.
    pub fn restores(&self) -> Vec<Vec<u8>> {
        self.state().restores.clone()
    }

    pub fn logouts(&self) -> usize {
        self.state().logouts
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state().sent.clone()
    }

    /// Completed sends in completion order.
    pub fn send_spans(&self) -> Vec<SendSpan> {
        self.state().send_spans.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        _identity: &Identity,
        _options: &TransportConnectOptions,
    ) -> Result<Connected, TransportError> {
        let delay = self.state().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.connect_errors.pop_front() {
            return Err(error);
        }
        state.connects += 1;
        let (tx, rx) = mpsc::channel(16);
        state.events.push(tx);
        Ok(Connected {
            connection: Arc::new(ScriptedConnection {
                state: self.state.clone(),
            }),
            events: rx,
        })
    }
}

struct ScriptedConnection {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnection {
    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn login(&self, qr: oneshot::Sender<String>) -> Result<AuthOutcome, TransportError> {
        let script = {
            let mut state = self.state();
            state.logins += 1;
            state.login.clone()
        };

        if let Some(after) = script.qr_after {
            tokio::time::sleep(after).await;
            qr.send(script.payload).ok();
        } else {
            // Keep the channel open so the caller waits on its own deadline.
            self.state().parked_qr.push(qr);
        }

        match script.complete_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending::<()>().await,
        }
        script.outcome
    }

    async fn restore(&self, credentials: &CredentialBlob) -> Result<AuthOutcome, TransportError> {
        let mut state = self.state();
        state.restores.push(credentials.as_bytes().to_vec());
        state
            .restore_results
            .pop_front()
            .unwrap_or(Ok(AuthOutcome::AlreadyAuthenticated))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.logouts += 1;
        match state.logout_result.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendOutcome, TransportError> {
        let started = Instant::now();
        let (delay, result) = {
            let mut state = self.state();
            state.sent.push(message.clone());
            let n = state.sent.len();
            let result = state
                .send_results
                .pop_front()
                .unwrap_or_else(|| Ok(SendOutcome::Sent(format!("msg-{n}"))));
            (state.send_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state().send_spans.push(SendSpan {
            started,
            finished: Instant::now(),
        });
        result
    }

    async fn test_liveness(&self) -> Result<(), TransportError> {
        self.state().liveness_results.pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) {
        self.state().disconnects += 1;
    }
}
