use std::time::Duration;

use base64::Engine;
use tokio::sync::oneshot;

use crate::error::SessionError;

/// A rendered QR code ready to show to the person scanning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl QrImage {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.to_base64())
    }
}

/// Turns a QR payload string into image bytes.
pub trait QrRenderer: Send + Sync {
    fn render(&self, payload: &str) -> Result<QrImage, SessionError>;
}

/// Renders QR codes as terminal block art.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalQrRenderer;

impl QrRenderer for TerminalQrRenderer {
    fn render(&self, payload: &str) -> Result<QrImage, SessionError> {
        let art = qr2term::generate_qr_string(payload)
            .map_err(|e| SessionError::QrRender(e.to_string()))?;
        Ok(QrImage {
            content_type: "text/plain; charset=utf-8".to_string(),
            bytes: art.into_bytes(),
        })
    }
}

/// Race the transport's QR payload against `timeout`.
///
/// Exactly two outcomes: the rendered image, or `HandshakeTimeout`. A sender
/// dropped without a payload does not end the race early; the login future
/// running beside this one reports its own failure.
pub async fn await_qr(
    payload: oneshot::Receiver<String>,
    timeout: Duration,
    renderer: &dyn QrRenderer,
) -> Result<QrImage, SessionError> {
    let wait = async {
        match payload.await {
            Ok(payload) => payload,
            Err(_) => std::future::pending().await,
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(payload) => {
            tracing::debug!(len = payload.len(), "qr payload received");
            renderer.render(&payload)
        }
        Err(_) => Err(SessionError::HandshakeTimeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRenderer;

    impl QrRenderer for EchoRenderer {
        fn render(&self, payload: &str) -> Result<QrImage, SessionError> {
            Ok(QrImage {
                content_type: "image/png".to_string(),
                bytes: payload.as_bytes().to_vec(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn payload_before_deadline_is_rendered() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            tx.send("2@abc,def".to_string()).ok();
        });

        let started = tokio::time::Instant::now();
        let image = await_qr(rx, Duration::from_secs(5), &EchoRenderer)
            .await
            .unwrap();
        assert_eq!(image.bytes, b"2@abc,def");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_payload_times_out() {
        let (_tx, rx) = oneshot::channel::<String>();
        let err = await_qr(rx, Duration::from_secs(5), &EchoRenderer)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::HandshakeTimeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_still_waits_for_deadline() {
        let (tx, rx) = oneshot::channel::<String>();
        drop(tx);
        let started = tokio::time::Instant::now();
        let err = await_qr(rx, Duration::from_secs(3), &EchoRenderer)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::HandshakeTimeout(_)));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn data_uri_encodes_bytes() {
        let image = QrImage {
            content_type: "image/png".to_string(),
            bytes: vec![0xde, 0xad],
        };
        assert_eq!(image.data_uri(), "data:image/png;base64,3q0=");
    }

    #[test]
    fn terminal_renderer_produces_text() {
        let image = TerminalQrRenderer.render("hello").unwrap();
        assert!(image.content_type.starts_with("text/plain"));
        assert!(!image.bytes.is_empty());
    }
}
