//! Token request/response types shared by the broker and the CSRF pipeline.

use serde::{Deserialize, Serialize};

/// Access token handed back to callers.
///
/// `expires_in` is whatever the issuing side reported. The hosted frame's
/// replies carry no expiry at all, so tokens obtained through the broker
/// always report `0` and must be treated as having unknown lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The opaque access token.
    #[serde(default)]
    pub access_token: String,

    /// Token lifetime in seconds, `0` when the issuer did not report one.
    #[serde(default)]
    pub expires_in: i64,
}

/// Scoping arguments for a token request.
///
/// Opaque to the broker; forwarded verbatim to the hosted frame. Field names
/// follow the frame's wire contract (camelCase, keys omitted when unset).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTokenArgs {
    /// Environment the token should be scoped to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,

    /// Permission scope within the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_scope: Option<String>,

    /// Legal entity the token should be scoped to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub le_id: Option<String>,

    /// Suppress the transparent sign-in redirect on auth failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_redirect: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_omit_unset_keys_on_the_wire() {
        let args = GetTokenArgs { env_id: Some("abc".into()), ..GetTokenArgs::default() };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json, serde_json::json!({ "envId": "abc" }));
    }

    #[test]
    fn token_response_defaults_are_empty() {
        let response = TokenResponse::default();
        assert_eq!(response.access_token, "");
        assert_eq!(response.expires_in, 0);
    }

    #[test]
    fn token_response_round_trips() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"xyz","expires_in":12345}"#).unwrap();
        assert_eq!(parsed, TokenResponse { access_token: "xyz".into(), expires_in: 12345 });
    }
}
