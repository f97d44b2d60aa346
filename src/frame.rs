//! Frame splitting and per-document decoding.
//!
//! The server batches queued messages into one text frame separated by `\n`.
//! Each document is decoded independently: a broken document is reported as a
//! [`DecodeError`] and never prevents its siblings from being processed.
//!
//! Decoding is two-step. The `type` tag is read first so that unknown tags can
//! be told apart from known tags with a malformed payload; the payload is then
//! validated against the [`ServerMessage`] schema for that tag.

use thiserror::Error;

use crate::dispatch::MessageKind;
use crate::protocol::ServerMessage;

/// One successfully tagged inbound document.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A known message that passed schema validation.
    Message(ServerMessage),
    /// A well-formed envelope whose tag this client does not know.
    Unknown { tag: String },
}

/// Why a single document of a frame was dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The document is not JSON at all.
    #[error("invalid JSON: {0}")]
    NotJson(#[source] serde_json::Error),

    /// The document is JSON but carries no string `type` field.
    #[error("envelope has no string `type` field")]
    MissingType,

    /// The tag is known but the payload does not match its schema.
    #[error("invalid {tag} payload: {source}")]
    InvalidPayload {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Split a raw frame into its non-blank documents, in arrival order.
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split('\n')
        .map(|doc| doc.trim_end_matches('\r'))
        .filter(|doc| !doc.trim().is_empty())
}

/// Decode one JSON document.
pub fn decode_document(doc: &str) -> Result<Inbound, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(doc).map_err(DecodeError::NotJson)?;
    let tag = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    let Some(kind) = MessageKind::from_tag(tag) else {
        return Ok(Inbound::Unknown {
            tag: tag.to_owned(),
        });
    };

    serde_json::from_value::<ServerMessage>(value)
        .map(Inbound::Message)
        .map_err(|source| DecodeError::InvalidPayload {
            tag: kind.as_str(),
            source,
        })
}

/// Decode every document of a frame. The result has one entry per document.
pub fn decode_frame(frame: &str) -> Vec<Result<Inbound, DecodeError>> {
    split_frame(frame).map(decode_document).collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn single_document_frame() {
        let out = decode_frame(r#"{"type":"NEW_CONNECTION","user":4}"#);
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0],
            Ok(Inbound::Message(ServerMessage::NewConnection { user: 4 }))
        ));
    }

    #[test]
    fn batched_frame_keeps_order_and_isolates_failures() {
        let frame = concat!(
            r#"{"type":"NEW_CONNECTION","user":1}"#,
            "\n",
            r#"{"type":"NEW_CONN"#,
            "\n",
            r#"{"type":"USER_DISCONNECTED","user":1}"#,
        );
        let out = decode_frame(frame);
        assert_eq!(out.len(), 3);
        assert!(matches!(
            out[0],
            Ok(Inbound::Message(ServerMessage::NewConnection { user: 1 }))
        ));
        assert!(matches!(out[1], Err(DecodeError::NotJson(_))));
        assert!(matches!(
            out[2],
            Ok(Inbound::Message(ServerMessage::UserDisconnected { user: 1 }))
        ));
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let out = decode_frame(r#"{"type":"FOO","x":1}"#);
        match &out[0] {
            Ok(Inbound::Unknown { tag }) => assert_eq!(tag, "FOO"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn known_tag_with_bad_payload_is_rejected() {
        let out = decode_frame(r#"{"type":"NEW_CONNECTION","user":"four"}"#);
        match &out[0] {
            Err(DecodeError::InvalidPayload { tag, .. }) => assert_eq!(*tag, "NEW_CONNECTION"),
            other => panic!("expected InvalidPayload, got {other:?}"),
        }
    }

    #[test]
    fn missing_type_is_rejected() {
        let out = decode_frame(r#"{"user":4}"#);
        assert!(matches!(out[0], Err(DecodeError::MissingType)));
    }

    #[test]
    fn blank_segments_and_crlf_are_ignored() {
        let frame = "{\"type\":\"NEW_CONNECTION\",\"user\":2}\r\n\n  \n";
        let out = decode_frame(frame);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
    }
}
