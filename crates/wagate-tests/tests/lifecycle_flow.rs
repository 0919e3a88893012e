use std::time::Duration;

use wagate::{
    AuthOutcome, ConnectOutcome, ConnectionEvent, Identity, Phase, SessionError, TransportError,
};
use wagate_tests::harness::transport::LoginScript;
use wagate_tests::harness::{COOLDOWN, TestGateway};

async fn connect(gw: &TestGateway, identity: &str) {
    gw.seed_credential(identity, b"cred").unwrap();
    let outcome = gw
        .manager
        .connect_identity(identity, TestGateway::options())
        .await
        .unwrap();
    assert_eq!(outcome, ConnectOutcome::Restored);
}

#[tokio::test(start_paused = true)]
async fn logout_forgets_session_and_credential() {
    let gw = TestGateway::new().unwrap();
    gw.transport.set_login(LoginScript::scanned(
        Duration::from_secs(1),
        Duration::from_secs(1),
        b"fresh",
    ));
    gw.manager
        .connect_identity("628111", TestGateway::options())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(gw.is_connected("628111"));

    gw.manager.logout_identity("628111").await.unwrap();

    assert!(!gw.is_connected("628111"));
    assert!(gw.stored_credential("628111").is_none());
    assert_eq!(gw.transport.logouts(), 1);
    assert_eq!(gw.transport.disconnects(), 1);
}

#[tokio::test]
async fn logout_unknown_identity_is_invalid() {
    let gw = TestGateway::new().unwrap();
    let err = gw.manager.logout_identity("628111").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidConnection(_)));
}

#[tokio::test(start_paused = true)]
async fn failed_logout_keeps_credential_but_closes_connection() {
    let gw = TestGateway::new().unwrap();
    connect(&gw, "628111").await;
    gw.transport
        .fail_logout(TransportError::Io("write failed".to_string()));

    let err = gw.manager.logout_identity("628111").await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Io(_))));
    assert!(!gw.is_connected("628111"));
    assert_eq!(gw.stored_credential("628111").unwrap(), b"cred");
    assert_eq!(gw.transport.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn liveness_check_evicts_closed_session() {
    let gw = TestGateway::new().unwrap();
    connect(&gw, "628111").await;

    gw.manager.check_liveness("628111").await.unwrap();

    gw.transport.push_liveness(Err(TransportError::Closed));
    let err = gw.manager.check_liveness("628111").await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Closed)));
    assert!(!gw.is_connected("628111"));
    assert!(gw.stored_credential("628111").is_none());
}

#[tokio::test(start_paused = true)]
async fn status_reports_phase_and_credential() {
    let gw = TestGateway::new().unwrap();
    assert!(gw.manager.status("628111").unwrap().is_none());

    connect(&gw, "628111").await;
    let status = gw.manager.status("+628111").unwrap().unwrap();
    assert_eq!(status.identity, Identity::parse("628111").unwrap());
    assert_eq!(status.phase, Phase::Live);
    assert!(status.connected_at_ms.is_some());
    assert!(status.has_credential);
}

#[tokio::test(start_paused = true)]
async fn connected_identities_lists_live_sessions() {
    let gw = TestGateway::new().unwrap();
    connect(&gw, "628333").await;
    connect(&gw, "628111").await;

    assert_eq!(
        gw.manager.connected_identities(),
        vec![
            Identity::parse("628111").unwrap(),
            Identity::parse("628333").unwrap()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn startup_restores_every_stored_session() {
    let gw = TestGateway::new().unwrap();
    gw.seed_credential("628111", b"a").unwrap();
    gw.seed_credential("628222", b"b").unwrap();
    gw.transport
        .push_restore(Ok(AuthOutcome::AlreadyAuthenticated));
    gw.transport
        .push_restore(Err(TransportError::Rejected("logged out".to_string())));

    let report = gw
        .manager
        .restore_stored_sessions(TestGateway::options())
        .await
        .unwrap();

    assert_eq!(report.restored, vec![Identity::parse("628111").unwrap()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, Identity::parse("628222").unwrap());
    assert!(matches!(report.failed[0].1, SessionError::RestoreRejected { .. }));
    assert_eq!(gw.transport.logins(), 0);
    assert!(gw.stored_credential("628222").is_some());
}

#[tokio::test]
async fn restore_only_never_falls_back_to_qr() {
    let gw = TestGateway::new().unwrap();
    let err = gw
        .manager
        .restore_identity("628111", TestGateway::options())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CredentialNotFound(_)));
    assert_eq!(gw.transport.logins(), 0);
    assert_eq!(gw.transport.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_sessions_and_keeps_credentials() {
    let gw = TestGateway::new().unwrap();
    connect(&gw, "628111").await;
    connect(&gw, "628222").await;

    gw.manager.shutdown().await;

    assert!(gw.manager.connected_identities().is_empty());
    assert!(gw.manager.registry().is_empty());
    assert_eq!(gw.transport.disconnects(), 2);
    assert!(gw.stored_credential("628111").is_some());
    assert!(gw.stored_credential("628222").is_some());

    gw.transport.emit(ConnectionEvent::Closed {
        reason: "late".to_string(),
    });
    tokio::time::sleep(COOLDOWN + Duration::from_secs(1)).await;
    assert_eq!(gw.transport.restores().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_after_shutdown_is_refused() {
    let gw = TestGateway::new().unwrap();
    gw.seed_credential("628111", b"cred").unwrap();
    gw.manager.shutdown().await;

    let err = gw
        .manager
        .connect_identity("628111", TestGateway::options())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ShuttingDown));
    assert_eq!(gw.transport.connects(), 0);
    assert!(!gw.is_connected("628111"));

    let report = gw
        .manager
        .restore_stored_sessions(TestGateway::options())
        .await
        .unwrap();
    assert!(report.restored.is_empty());
    assert!(matches!(report.failed[0].1, SessionError::ShuttingDown));
    assert!(gw.stored_credential("628111").is_some());
}
