//! Outbound message dispatch on live sessions.

use std::time::Duration;

use rand::Rng;

use crate::destination::Destination;
use crate::error::SessionError;
use crate::identity::Identity;
use crate::manager::SessionManager;
use crate::message::{OutboundMessage, Quote};
use crate::reconnect;
use crate::transport::{SendOutcome, TransportError};

/// Random pause before each send, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendJitter {
    min: Duration,
    max: Duration,
}

impl SendJitter {
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if min == max {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl SessionManager {
    pub async fn send_text(
        &self,
        identity: &str,
        destination: &str,
        body: &str,
        quoted: Option<Quote>,
    ) -> Result<String, SessionError> {
        let identity = Identity::parse(identity)?;
        let message = OutboundMessage::text(Destination::parse(destination)?, body, quoted)?;
        self.dispatch(&identity, &message).await
    }

    /// The media kind follows `mime_type`; documents use `caption` as file name.
    pub async fn send_media(
        &self,
        identity: &str,
        destination: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        caption: Option<String>,
        quoted: Option<Quote>,
    ) -> Result<String, SessionError> {
        let identity = Identity::parse(identity)?;
        let message = OutboundMessage::media(
            Destination::parse(destination)?,
            bytes,
            mime_type,
            caption,
            quoted,
        )?;
        self.dispatch(&identity, &message).await
    }

    pub async fn send_location(
        &self,
        identity: &str,
        destination: &str,
        latitude: f64,
        longitude: f64,
        quoted: Option<Quote>,
    ) -> Result<String, SessionError> {
        let identity = Identity::parse(identity)?;
        let message =
            OutboundMessage::location(Destination::parse(destination)?, latitude, longitude, quoted)?;
        self.dispatch(&identity, &message).await
    }

    /// Send on the identity's live connection and return the message id.
    ///
    /// A send that times out at the transport still counts as sent.
    pub async fn dispatch(
        &self,
        identity: &Identity,
        message: &OutboundMessage,
    ) -> Result<String, SessionError> {
        let shared = &self.shared;
        if !shared.registry.is_connected(identity) {
            return Err(SessionError::InvalidConnection(identity.clone()));
        }

        // One send at a time per identity.
        let lock = shared.registry.lock_for(identity);
        let _guard = lock.lock().await;
        let Some(entry) = shared.registry.get_live(identity) else {
            return Err(SessionError::InvalidConnection(identity.clone()));
        };

        let pause = shared.options.send_jitter.sample();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let handle_id = entry.handle.id();
        match entry.handle.connection().send(message).await {
            Ok(SendOutcome::Sent(message_id)) => {
                shared.registry.touch(identity, handle_id);
                tracing::debug!(
                    identity = %identity.masked(),
                    kind = message.kind_label(),
                    group = message.destination.is_group(),
                    "message sent"
                );
                Ok(message_id)
            }
            Ok(SendOutcome::TimedOut(message_id)) => {
                tracing::warn!(identity = %identity.masked(), kind = message.kind_label(), "send timed out, treating as sent");
                Ok(message_id)
            }
            Err(TransportError::Closed) => {
                reconnect::evict_locked(shared, identity, handle_id, "send on closed connection")
                    .await;
                Err(TransportError::Closed.into())
            }
            Err(e) => {
                tracing::warn!(identity = %identity.masked(), error = %e, "send failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let jitter = SendJitter::new(Duration::from_millis(1000), Duration::from_millis(3000));
        for _ in 0..200 {
            let pause = jitter.sample();
            assert!(pause >= Duration::from_millis(1000));
            assert!(pause <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn inverted_bounds_are_swapped() {
        let jitter = SendJitter::new(Duration::from_millis(50), Duration::from_millis(10));
        let pause = jitter.sample();
        assert!(pause >= Duration::from_millis(10) && pause <= Duration::from_millis(50));
    }

    #[test]
    fn zero_jitter_never_pauses() {
        assert_eq!(SendJitter::none().sample(), Duration::ZERO);
    }
}
