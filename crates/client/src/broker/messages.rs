//! Wire contract with the hosted cross-domain frame.
//!
//! Outbound messages are posted to the frame window restricted to the fixed
//! trusted origin. Inbound messages arrive as an envelope carrying the
//! transport-level origin plus the raw payload; the payload is decoded into
//! a tagged [`InboundMessage`] before any dispatch happens, so malformed or
//! unrecognized traffic is dropped at the boundary.

use serde::{Deserialize, Serialize};
use sky_auth_common::redirect::SOURCE;
use sky_auth_common::{GetTokenArgs, TokenErrorCode};

/// URL the hidden frame is pointed at.
pub const FRAME_URL: &str =
    "https://s21aidntoken00blkbapp01.nxt.blackbaud.com/Iframes/CrossDomainAuthFrame.html";

/// The only origin outbound messages may be delivered to, and the only
/// transport origin inbound messages are accepted from.
pub const TARGET_ORIGIN: &str = "https://s21aidntoken00blkbapp01.nxt.blackbaud.com";

/// Identity tag the hosted frame stamps on its messages.
pub const TRUSTED_HOST: &str = "security-token-svc";

/// Element id of the shared hidden frame.
pub const FRAME_ELEMENT_ID: &str = "auth-cross-domain-iframe";

/// Message posted to the frame window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Always `getToken`.
    pub message_type: String,
    /// Correlation id pairing this request with its eventual reply.
    pub request_id: String,
    /// This client's identity tag (`auth-client`).
    pub source: String,
    /// Scoping arguments, opaque to the broker.
    pub value: GetTokenArgs,
}

impl OutboundMessage {
    /// Build a token request message.
    #[must_use]
    pub fn get_token(request_id: String, value: GetTokenArgs) -> Self {
        Self {
            message_type: "getToken".to_string(),
            request_id,
            source: SOURCE.to_string(),
            value,
        }
    }
}

/// Error payload carried by the frame's `error` messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameError {
    /// Classification code; unknown spellings fold into `Unknown`.
    pub code: TokenErrorCode,
    /// Human-readable description from the frame.
    #[serde(default)]
    pub message: String,
}

/// Decoded inbound message, discriminated by `messageType`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "messageType")]
pub enum InboundMessage {
    /// The frame has finished loading and may receive messages.
    #[serde(rename = "ready")]
    Ready,
    /// Correlated token reply. The frame reports no expiry.
    #[serde(rename = "getToken", rename_all = "camelCase")]
    Token {
        /// Correlation id of the request being answered.
        request_id: String,
        /// The access token.
        value: String,
    },
    /// Correlated error reply.
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        /// Correlation id of the request being answered.
        request_id: String,
        /// The carried error.
        value: FrameError,
    },
    /// Anything else; ignored without error.
    #[serde(other)]
    Other,
}

/// What the host delivers for every cross-context message event.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    /// Transport-level origin of the sender.
    pub origin: String,
    /// Raw message payload, decoded lazily after the trust check.
    pub data: serde_json::Value,
}

impl MessageEnvelope {
    /// Wrap a received message.
    #[must_use]
    pub fn new(origin: impl Into<String>, data: serde_json::Value) -> Self {
        Self { origin: origin.into(), data }
    }

    /// Whether this envelope may be dispatched at all.
    ///
    /// Accepted when the payload claims the trusted host identity or the
    /// transport origin matches `target_origin`; everything else is dropped
    /// silently since unrelated page activity shares the same channel.
    #[must_use]
    pub fn is_trusted(&self, target_origin: &str) -> bool {
        let source_matches = self
            .data
            .get("source")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|source| source == TRUSTED_HOST);

        source_matches || self.origin == target_origin
    }
}
