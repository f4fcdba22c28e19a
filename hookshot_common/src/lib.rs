//! Hookshot Common - Shared wire protocol for the webhook relay
//!
//! This crate contains the envelope and payload definitions exchanged over
//! the tunnel WebSocket, plus the id and header helpers used by both the
//! server and the CLI.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Envelope tag. Determines the shape of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    /// Sent by the client immediately after the WebSocket is established
    Register,
    /// Server confirmation carrying the assigned tunnel id and public URL
    Registered,
    /// HTTP request relayed from the server to the client
    Request,
    /// HTTP response relayed from the client back to the server
    Response,
    /// Application-level keepalive
    Ping,
    /// Answer to an application-level ping
    Pong,
    /// Registration rejection
    Error,
    /// Any tag this build does not know; logged and dropped by receivers
    #[serde(other)]
    Unknown,
}

/// The envelope for all tunnel messages. The payload is kept as an opaque
/// JSON value so routing by tag does not require knowing every schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub tag: Tag,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create an envelope with the given tag and payload
    pub fn new<T: Serialize>(tag: Tag, payload: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            tag,
            payload: serde_json::to_value(payload).map_err(ProtocolError::Encode)?,
        })
    }

    /// Create an envelope with no payload (`ping`, `pong`)
    pub fn bare(tag: Tag) -> Self {
        Self {
            tag,
            payload: serde_json::Value::Null,
        }
    }

    /// Parse the payload into the given type
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(ProtocolError::Decode)
    }

    /// Serialize to the text frame carried over the WebSocket
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Deserialize from a received text frame
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Sent by the client to register a tunnel. The requested tunnel id is
/// advisory only; the server assigns its own (see `RegisteredPayload`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Sent by the server to confirm registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredPayload {
    pub tunnel_id: String,
    pub public_url: String,
}

/// An incoming webhook request to be forwarded through the tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub id: String,
    pub tunnel_id: String,
    pub method: String,
    /// Path including the raw query string, always starting with `/`
    pub path: String,
    pub headers: HashMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// The response observed by the client's local target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub request_id: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

/// Registration rejection detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Error code sent when the register token does not match
pub const ERROR_CODE_UNAUTHORIZED: &str = "unauthorized";

/// Length of the display form of a tunnel id
pub const SHORT_ID_LEN: usize = 8;

/// Generate a full-entropy tunnel id (16 random bytes, hex-encoded).
/// Only the first [`SHORT_ID_LEN`] characters may appear in logs.
pub fn new_tunnel_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(&bytes)
}

/// Generate an 8-hex-character request correlator
pub fn new_request_id() -> String {
    let bytes: [u8; 4] = rand::random();
    hex::encode(&bytes)
}

/// Display form of a tunnel id: the first [`SHORT_ID_LEN`] characters
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(SHORT_ID_LEN)]
}

/// Hop-by-hop headers, consumed by one hop and never forwarded.
/// Stripped from both relayed requests and relayed responses.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Te",
    "Trailers",
    "Transfer-Encoding",
    "Upgrade",
];

/// Check whether a header name is hop-by-hop
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Bodies are raw octet sequences; inside the JSON envelope they travel as
/// base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let request = HttpRequest {
            id: new_request_id(),
            tunnel_id: new_tunnel_id(),
            method: "POST".to_string(),
            path: "/webhooks/stripe?src=test".to_string(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: b"{\"ok\":true}".to_vec(),
            timestamp: Utc::now(),
        };

        let text = Envelope::new(Tag::Request, &request)
            .unwrap()
            .to_text()
            .unwrap();
        let envelope = Envelope::from_text(&text).unwrap();
        assert_eq!(envelope.tag, Tag::Request);

        let decoded: HttpRequest = envelope.parse_payload().unwrap();
        assert_eq!(decoded.id, request.id);
        assert_eq!(decoded.method, "POST");
        assert_eq!(decoded.path, "/webhooks/stripe?src=test");
        assert_eq!(decoded.body, request.body);
    }

    #[test]
    fn body_travels_as_base64() {
        let response = HttpResponse {
            request_id: "abcd1234".to_string(),
            status_code: 200,
            headers: HashMap::new(),
            body: vec![0, 159, 146, 150],
        };

        let text = Envelope::new(Tag::Response, &response)
            .unwrap()
            .to_text()
            .unwrap();
        // The raw bytes are not valid UTF-8 so they must travel encoded
        assert!(text.contains("AJ+Slg=="));

        let decoded: HttpResponse = Envelope::from_text(&text).unwrap().parse_payload().unwrap();
        assert_eq!(decoded.body, vec![0, 159, 146, 150]);
    }

    #[test]
    fn unknown_tag_is_tolerated() {
        let envelope = Envelope::from_text(r#"{"type":"rtt_probe","payload":{"seq":7}}"#).unwrap();
        assert_eq!(envelope.tag, Tag::Unknown);
    }

    #[test]
    fn malformed_envelope_is_an_error() {
        assert!(Envelope::from_text("not json").is_err());
        assert!(Envelope::from_text(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn register_payload_fields_are_optional() {
        let envelope = Envelope::from_text(r#"{"type":"register","payload":{}}"#).unwrap();
        let register: RegisterPayload = envelope.parse_payload().unwrap();
        assert!(register.tunnel_id.is_none());
        assert!(register.token.is_none());
    }

    #[test]
    fn tunnel_ids_are_full_entropy_with_short_display() {
        let id = new_tunnel_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(short_id(&id).len(), SHORT_ID_LEN);
        assert!(id.starts_with(short_id(&id)));

        let request_id = new_request_id();
        assert_eq!(request_id.len(), 8);
    }

    #[test]
    fn hop_by_hop_matching() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
    }
}
