//! CSRF-protected request pipeline.
//!
//! Mutating calls against the platform are guarded by a one-time
//! anti-forgery token: each outer call first asks the security token
//! service for a fresh CSRF token (no caching across calls), attaches it to
//! the protected request, and routes every failure through the shared
//! redirect decider. The pipeline also provides plain bearer-token requests
//! as a building block.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sky_auth_common::{
    Navigator, RedirectDecider, StsDomain, TokenError, TokenErrorCode, TokenResponse,
};
use tracing::debug;

/// Fixed bootstrap value the token-issuing endpoint expects in lieu of a
/// real CSRF token.
const CSRF_BOOTSTRAP_TOKEN: &str = "token_needed";

/// Header carrying the anti-forgery token.
const CSRF_HEADER: &str = "X-CSRF";

/// Per-call options for [`CsrfClient::request`] and
/// [`CsrfClient::post_with_csrf`].
#[derive(Debug, Clone, Default)]
pub struct TokenRequestOptions {
    /// Extra query parameters appended to the sign-in URL on auth redirects.
    pub signin_redirect_params: Vec<(String, String)>,
    /// Reject with a typed error instead of redirecting on auth failures.
    pub disable_redirect: bool,
    /// Environment the token should be scoped to.
    pub environment_id: Option<String>,
    /// Permission scope; requires an environment or legal entity.
    pub permission_scope: Option<String>,
    /// Legal entity the token should be scoped to.
    pub legal_entity_id: Option<String>,
    /// Skip the CSRF-token fetch and call the target URL directly.
    pub bypass_csrf: bool,
}

impl TokenRequestOptions {
    /// Append an extra sign-in redirect query parameter.
    #[must_use]
    pub fn signin_redirect_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.signin_redirect_params.push((key.into(), value.into()));
        self
    }

    /// Reject in place instead of redirecting on auth failures.
    #[must_use]
    pub fn disable_redirect(mut self) -> Self {
        self.disable_redirect = true;
        self
    }

    /// Scope the token to an environment.
    #[must_use]
    pub fn environment_id(mut self, id: impl Into<String>) -> Self {
        self.environment_id = Some(id.into());
        self
    }

    /// Request a permission scope within the environment or legal entity.
    #[must_use]
    pub fn permission_scope(mut self, scope: impl Into<String>) -> Self {
        self.permission_scope = Some(scope.into());
        self
    }

    /// Scope the token to a legal entity.
    #[must_use]
    pub fn legal_entity_id(mut self, id: impl Into<String>) -> Self {
        self.legal_entity_id = Some(id.into());
        self
    }

    /// Skip the CSRF-token fetch entirely.
    #[must_use]
    pub fn bypass_csrf(mut self) -> Self {
        self.bypass_csrf = true;
        self
    }

    fn scope_body(&self) -> Option<ScopeBody<'_>> {
        if self.environment_id.is_none()
            && self.legal_entity_id.is_none()
            && self.permission_scope.is_none()
        {
            return None;
        }

        Some(ScopeBody {
            environment_id: self.environment_id.as_deref(),
            legal_entity_id: self.legal_entity_id.as_deref(),
            permission_scope: self.permission_scope.as_deref(),
        })
    }

    fn validate(&self) -> Result<(), TokenError> {
        if self.permission_scope.is_some()
            && self.environment_id.is_none()
            && self.legal_entity_id.is_none()
        {
            return Err(TokenError::permission_scope_no_environment());
        }
        Ok(())
    }
}

/// JSON body attached to protected requests; omitted keys are not sent.
#[derive(Debug, Serialize)]
struct ScopeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    environment_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    legal_entity_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    permission_scope: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CsrfTokenBody {
    csrf_token: String,
}

/// Client for CSRF-protected and bearer-token HTTP calls.
#[derive(Clone)]
pub struct CsrfClient {
    http: reqwest::Client,
    sts: StsDomain,
    decider: RedirectDecider,
}

impl CsrfClient {
    /// Start building a client.
    #[must_use]
    pub fn builder() -> CsrfClientBuilder {
        CsrfClientBuilder::default()
    }

    /// Acquire a token through the CSRF-protected flow.
    ///
    /// Fetches a fresh anti-forgery token (unless bypassed), posts to `url`
    /// with it, and resolves with the token response. An empty success body
    /// resolves with the default response; JSON parsing is never attempted
    /// on an empty body.
    ///
    /// # Errors
    /// Rejects immediately with `PermissionScopeNoEnvironment` when a
    /// permission scope is supplied without an environment or legal entity.
    /// Other failures are classified by the shared decider: `Offline` and
    /// `NotLoggedIn`-with-redirects-disabled reject in place, everything
    /// else navigates away and returns the classified error.
    pub async fn request(
        &self,
        url: &str,
        options: TokenRequestOptions,
    ) -> Result<TokenResponse, TokenError> {
        let body = self.execute_protected(url, &options).await?;

        if body.is_empty() {
            return Ok(TokenResponse::default());
        }

        serde_json::from_str(&body).map_err(|err| {
            TokenError::new(
                TokenErrorCode::Unknown,
                format!("Failed to parse the token response: {err}"),
            )
        })
    }

    /// Perform a generic CSRF-protected mutating call, returning the raw
    /// response body.
    ///
    /// # Errors
    /// Classified the same way as [`CsrfClient::request`].
    pub async fn post_with_csrf(
        &self,
        url: &str,
        options: TokenRequestOptions,
    ) -> Result<String, TokenError> {
        self.execute_protected(url, &options).await
    }

    /// Issue an authenticated request using an already-held access token.
    ///
    /// Always sends `Accept: application/json` and `Authorization: Bearer`;
    /// when `data` is supplied, also `Content-Type: application/json` with
    /// the serialized body. Never redirects.
    ///
    /// # Errors
    /// A transport failure rejects with `Offline`; a non-2xx response
    /// rejects with a code derived from the status.
    pub async fn request_with_token(
        &self,
        url: &str,
        access_token: &str,
        method: Method,
        data: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TokenError> {
        let mut builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"));

        if let Some(data) = &data {
            builder = builder.json(data);
        }

        let response = builder.send().await.map_err(|err| {
            debug!(error = %err, %url, "bearer request never reached the server");
            TokenError::offline()
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::new(
                code_for_status(status),
                format!("The request failed with status {}.", status.as_u16()),
            ));
        }

        let body = response.text().await.map_err(|err| {
            TokenError::new(TokenErrorCode::Unknown, format!("Failed to read the response: {err}"))
        })?;

        if body.is_empty() {
            return Ok(serde_json::Value::Null);
        }

        // Non-JSON success bodies come back as raw text.
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
    }

    /// Two-step protocol shared by `request` and `post_with_csrf`.
    async fn execute_protected(
        &self,
        url: &str,
        options: &TokenRequestOptions,
    ) -> Result<String, TokenError> {
        options.validate()?;

        let csrf_token = if options.bypass_csrf {
            None
        } else {
            Some(self.fetch_csrf_token(options).await?)
        };

        let mut builder = self.http.post(url);
        if let Some(token) = &csrf_token {
            builder = builder.header(CSRF_HEADER, token.as_str());
        }
        if let Some(body) = options.scope_body() {
            builder = builder.json(&body);
        }

        debug!(%url, csrf = csrf_token.is_some(), "issuing protected request");
        let response = builder.send().await.map_err(|err| self.transport_failure(err, options))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.decider.handle_status(
                status.as_u16(),
                options.disable_redirect,
                &options.signin_redirect_params,
            ));
        }

        response.text().await.map_err(|err| {
            TokenError::new(TokenErrorCode::Unknown, format!("Failed to read the response: {err}"))
        })
    }

    /// Fetch a fresh one-time anti-forgery token. The issuing call carries
    /// no body, only the fixed bootstrap header value.
    async fn fetch_csrf_token(&self, options: &TokenRequestOptions) -> Result<String, TokenError> {
        let url = self.sts.csrf_url();
        debug!(%url, "fetching CSRF token");

        let response = self
            .http
            .post(&url)
            .header(CSRF_HEADER, CSRF_BOOTSTRAP_TOKEN)
            .send()
            .await
            .map_err(|err| self.transport_failure(err, options))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.decider.handle_status(
                status.as_u16(),
                options.disable_redirect,
                &options.signin_redirect_params,
            ));
        }

        let body: CsrfTokenBody = response.json().await.map_err(|err| {
            TokenError::new(
                TokenErrorCode::Unknown,
                format!("Failed to parse the CSRF token response: {err}"),
            )
        })?;

        Ok(body.csrf_token)
    }

    /// The status-0 analogue: the transport never produced a response.
    fn transport_failure(&self, err: reqwest::Error, options: &TokenRequestOptions) -> TokenError {
        debug!(error = %err, "request never reached the server");
        self.decider.handle_status(0, options.disable_redirect, &options.signin_redirect_params)
    }
}

fn code_for_status(status: StatusCode) -> TokenErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => TokenErrorCode::NotLoggedIn,
        StatusCode::FORBIDDEN => TokenErrorCode::InvalidEnvironment,
        _ => TokenErrorCode::Unknown,
    }
}

/// Builder for [`CsrfClient`].
#[derive(Debug)]
pub struct CsrfClientBuilder {
    timeout: Duration,
    sts: StsDomain,
}

impl Default for CsrfClientBuilder {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), sts: StsDomain::default() }
    }
}

impl CsrfClientBuilder {
    /// Overall request timeout for every HTTP call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the security token service against a non-default host.
    #[must_use]
    pub fn sts_domain(mut self, sts: StsDomain) -> Self {
        self.sts = sts;
        self
    }

    /// Build the client against the host's navigator.
    ///
    /// # Errors
    /// Returns an error when the underlying HTTP client cannot be
    /// constructed.
    pub fn build(self, navigator: Arc<dyn Navigator>) -> Result<CsrfClient, TokenError> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .no_proxy()
            .build()
            .map_err(|err| {
                TokenError::new(
                    TokenErrorCode::Unknown,
                    format!("Failed to build the HTTP client: {err}"),
                )
            })?;

        Ok(CsrfClient { http, sts: self.sts, decider: RedirectDecider::new(navigator) })
    }
}
