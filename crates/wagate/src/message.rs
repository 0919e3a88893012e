use serde::{Deserialize, Serialize};

use crate::destination::Destination;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Pick the media kind from a MIME type; unknown types go as documents.
    pub fn from_mime(mime_type: &str) -> Self {
        let top = mime_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match top.as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }
}

/// Reference to a previously received message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Media {
        kind: MediaKind,
        mime_type: String,
        bytes: Vec<u8>,
        caption: Option<String>,
        file_name: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
}

/// A message ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub destination: Destination,
    pub content: MessageContent,
    pub quoted: Option<Quote>,
}

impl OutboundMessage {
    pub fn text(
        destination: Destination,
        body: impl Into<String>,
        quoted: Option<Quote>,
    ) -> Result<Self, SessionError> {
        let body = body.into();
        if body.is_empty() {
            return Err(SessionError::InvalidMessage(
                "text body must not be empty".to_string(),
            ));
        }
        Ok(Self {
            destination,
            content: MessageContent::Text { body },
            quoted,
        })
    }

    pub fn media(
        destination: Destination,
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        caption: Option<String>,
        quoted: Option<Quote>,
    ) -> Result<Self, SessionError> {
        if bytes.is_empty() {
            return Err(SessionError::InvalidMessage(
                "media payload must not be empty".to_string(),
            ));
        }
        let mime_type = mime_type.into();
        let kind = MediaKind::from_mime(&mime_type);
        // Documents are titled by their caption.
        let file_name = match kind {
            MediaKind::Document => caption.clone(),
            _ => None,
        };
        Ok(Self {
            destination,
            content: MessageContent::Media {
                kind,
                mime_type,
                bytes,
                caption,
                file_name,
            },
            quoted,
        })
    }

    pub fn location(
        destination: Destination,
        latitude: f64,
        longitude: f64,
        quoted: Option<Quote>,
    ) -> Result<Self, SessionError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(SessionError::InvalidMessage(format!(
                "coordinates out of range: {latitude}, {longitude}"
            )));
        }
        Ok(Self {
            destination,
            content: MessageContent::Location {
                latitude,
                longitude,
            },
            quoted,
        })
    }

    /// Short label for logs.
    pub fn kind_label(&self) -> &'static str {
        match &self.content {
            MessageContent::Text { .. } => "text",
            MessageContent::Media { kind, .. } => match kind {
                MediaKind::Image => "image",
                MediaKind::Video => "video",
                MediaKind::Audio => "audio",
                MediaKind::Document => "document",
            },
            MessageContent::Location { .. } => "location",
        }
    }
}
