//! Token error taxonomy shared by the broker and the CSRF pipeline.
//!
//! Every failure either side can observe is collapsed into a small set of
//! codes, each mapped to exactly one handling policy by the redirect decider
//! (see [`crate::redirect`]). The codes travel on the wire as snake_case
//! strings, matching what the hosted frame and the error pages expect.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification code attached to every [`TokenError`].
///
/// The set is fixed; inbound codes this library does not recognize are
/// folded into [`TokenErrorCode::Unknown`] so they still route to the
/// generic handling policy instead of failing decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorCode {
    /// The transport could not reach the server at all.
    Offline,
    /// The server demanded authentication.
    NotLoggedIn,
    /// The user is not a member of the requested environment or scope.
    #[serde(rename = "invalid_env")]
    InvalidEnvironment,
    /// A permission scope was supplied without an environment or legal
    /// entity to scope it to.
    PermissionScopeNoEnvironment,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

impl TokenErrorCode {
    /// Wire spelling of the code, used when building error-page URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::NotLoggedIn => "not_logged_in",
            Self::InvalidEnvironment => "invalid_env",
            Self::PermissionScopeNoEnvironment => "permission_scope_no_environment",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TokenErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error surfaced to callers of `get_token` and the CSRF pipeline.
///
/// Carries a [`TokenErrorCode`] plus a human-readable message. Only a subset
/// of codes ever reaches callers (`Offline`, `NotLoggedIn` with redirects
/// disabled, `PermissionScopeNoEnvironment`); the rest normally manifest as
/// a full-page navigation instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TokenError {
    /// Classification code deciding the handling policy.
    pub code: TokenErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl TokenError {
    /// Build an error with a custom message.
    #[must_use]
    pub fn new(code: TokenErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// The user is offline; the transport never reached the server.
    #[must_use]
    pub fn offline() -> Self {
        Self::new(TokenErrorCode::Offline, "The user is offline.")
    }

    /// The user is not logged in and redirecting was disabled.
    #[must_use]
    pub fn not_logged_in() -> Self {
        Self::new(TokenErrorCode::NotLoggedIn, "The user is not logged in.")
    }

    /// A permission scope was requested without anything to scope it to.
    #[must_use]
    pub fn permission_scope_no_environment() -> Self {
        Self::new(
            TokenErrorCode::PermissionScopeNoEnvironment,
            "You must also specify an environment or legal entity when specifying a permission scope.",
        )
    }
}
