//! Redirect decider: the single authoritative mapping from an observed
//! failure condition to either a full-page navigation or a typed rejection.
//!
//! Both the token broker (for `error` frame messages) and the CSRF pipeline
//! (for HTTP failures) route every failure through this module, so the two
//! halves can never disagree on policy. Redirect URLs are assembled with a
//! stable query-parameter order (`source`, `url`, `code`) to keep the
//! contract testable.

use std::sync::Arc;

use tracing::debug;

use crate::error::{TokenError, TokenErrorCode};
use crate::navigation::Navigator;

/// Identity tag this client stamps on redirects and frame messages.
pub const SOURCE: &str = "auth-client";

const SIGNIN_URL: &str = "https://signin.blackbaud.com/signin/";
const SECURITY_ERROR_URL: &str = "https://host.nxt.blackbaud.com/errors/security";
const BROKEN_ERROR_URL: &str = "https://host.nxt.blackbaud.com/errors/broken";

/// Outcome of classifying a failure.
///
/// `Redirect` still carries the classified error: navigation tears the page
/// down in a browser host, but an async library cannot leave the caller's
/// future pending forever, so the error is returned after the navigation
/// side effect fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Surface the error to the caller; no navigation.
    Reject(TokenError),
    /// Navigate to `url`, then surface the error.
    Redirect {
        /// Destination of the full-page navigation.
        url: String,
        /// The classification behind the redirect.
        error: TokenError,
    },
}

impl Disposition {
    /// Apply the side effect (if any) against `navigator` and hand back the
    /// error the caller observes.
    pub fn apply(self, navigator: &dyn Navigator) -> TokenError {
        match self {
            Self::Reject(error) => error,
            Self::Redirect { url, error } => {
                debug!(%url, code = %error.code, "redirecting after failure");
                navigator.navigate(&url);
                error
            }
        }
    }
}

/// Shared classification logic bound to a [`Navigator`].
#[derive(Clone)]
pub struct RedirectDecider {
    navigator: Arc<dyn Navigator>,
}

impl RedirectDecider {
    /// Bind the decider to the host's navigator.
    #[must_use]
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self { navigator }
    }

    /// The navigator this decider applies redirects against.
    #[must_use]
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Classify an HTTP-style status. Status `0` means the transport never
    /// reached the server.
    #[must_use]
    pub fn classify_status(
        &self,
        status: u16,
        disable_redirect: bool,
        extra_signin_params: &[(String, String)],
    ) -> Disposition {
        match status {
            0 => Disposition::Reject(TokenError::offline()),
            401 if disable_redirect => Disposition::Reject(TokenError::not_logged_in()),
            401 => Disposition::Redirect {
                url: self.signin_url(extra_signin_params),
                error: TokenError::not_logged_in(),
            },
            403 => self.security_redirect(TokenErrorCode::InvalidEnvironment),
            _ => Disposition::Redirect {
                url: self.broken_url(),
                error: TokenError::new(TokenErrorCode::Unknown, "An unknown error occurred."),
            },
        }
    }

    /// Classify an `error` reply from the hosted frame.
    #[must_use]
    pub fn classify_frame_error(&self, code: TokenErrorCode, message: String) -> Disposition {
        match code {
            TokenErrorCode::Offline => {
                Disposition::Reject(TokenError::new(TokenErrorCode::Offline, message))
            }
            TokenErrorCode::NotLoggedIn => Disposition::Redirect {
                url: self.signin_url(&[]),
                error: TokenError::not_logged_in(),
            },
            other => self.security_redirect(other),
        }
    }

    /// Classify and apply in one step; the common path for both consumers.
    pub fn handle_status(
        &self,
        status: u16,
        disable_redirect: bool,
        extra_signin_params: &[(String, String)],
    ) -> TokenError {
        self.classify_status(status, disable_redirect, extra_signin_params)
            .apply(self.navigator.as_ref())
    }

    /// Sign-in URL carrying the current page as the return target plus any
    /// caller-supplied extra query parameters, all URL-encoded.
    #[must_use]
    pub fn signin_url(&self, extra_params: &[(String, String)]) -> String {
        let mut url = format!(
            "{SIGNIN_URL}?redirectUrl={}",
            urlencoding::encode(&self.navigator.current_url())
        );

        for (key, value) in extra_params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        url
    }

    fn security_redirect(&self, code: TokenErrorCode) -> Disposition {
        Disposition::Redirect {
            url: format!(
                "{SECURITY_ERROR_URL}?source={SOURCE}&url={}&code={}",
                urlencoding::encode(&self.navigator.current_url()),
                code.as_str(),
            ),
            error: TokenError::new(code, "The user is not a member of the requested scope."),
        }
    }

    fn broken_url(&self) -> String {
        format!(
            "{BROKEN_ERROR_URL}?source={SOURCE}&url={}",
            urlencoding::encode(&self.navigator.current_url())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNavigator;

    fn decider() -> (Arc<RecordingNavigator>, RedirectDecider) {
        let navigator = Arc::new(RecordingNavigator::at("https://example.com/page"));
        (navigator.clone(), RedirectDecider::new(navigator))
    }

    #[test]
    fn status_zero_rejects_offline_without_redirect() {
        let (navigator, decider) = decider();
        let error = decider.handle_status(0, false, &[]);

        assert_eq!(error.code, TokenErrorCode::Offline);
        assert_eq!(error.message, "The user is offline.");
        assert!(navigator.navigations().is_empty());
    }

    #[test]
    fn unauthorized_redirects_to_signin_with_return_target() {
        let (navigator, decider) = decider();
        decider.handle_status(401, false, &[]);

        assert_eq!(
            navigator.navigations(),
            vec![
                "https://signin.blackbaud.com/signin/?redirectUrl=https%3A%2F%2Fexample.com%2Fpage"
                    .to_string()
            ]
        );
    }

    #[test]
    fn extra_signin_params_are_encoded_and_appended_in_order() {
        let (navigator, decider) = decider();
        decider.handle_status(401, false, &[("=foo=".to_string(), "b&r".to_string())]);

        assert_eq!(
            navigator.navigations(),
            vec![
                "https://signin.blackbaud.com/signin/?redirectUrl=https%3A%2F%2Fexample.com%2Fpage&%3Dfoo%3D=b%26r"
                    .to_string()
            ]
        );
    }

    #[test]
    fn unauthorized_with_redirect_disabled_rejects_in_place() {
        let (navigator, decider) = decider();
        let error = decider.handle_status(401, true, &[]);

        assert_eq!(error.code, TokenErrorCode::NotLoggedIn);
        assert_eq!(error.message, "The user is not logged in.");
        assert!(navigator.navigations().is_empty());
    }

    #[test]
    fn forbidden_redirects_to_security_page_with_stable_param_order() {
        let (navigator, decider) = decider();
        decider.handle_status(403, false, &[]);

        assert_eq!(
            navigator.navigations(),
            vec![
                "https://host.nxt.blackbaud.com/errors/security?source=auth-client&url=https%3A%2F%2Fexample.com%2Fpage&code=invalid_env"
                    .to_string()
            ]
        );
    }

    #[test]
    fn other_statuses_redirect_to_the_broken_page() {
        let (navigator, decider) = decider();
        decider.handle_status(500, false, &[]);

        assert_eq!(
            navigator.navigations(),
            vec![
                "https://host.nxt.blackbaud.com/errors/broken?source=auth-client&url=https%3A%2F%2Fexample.com%2Fpage"
                    .to_string()
            ]
        );
    }

    #[test]
    fn frame_offline_errors_reject_with_the_frame_message() {
        let (navigator, decider) = decider();
        let disposition = decider
            .classify_frame_error(TokenErrorCode::Offline, "The user is offline.".to_string());

        let error = disposition.apply(navigator.as_ref());
        assert_eq!(error, TokenError::offline());
        assert!(navigator.navigations().is_empty());
    }

    #[test]
    fn frame_not_logged_in_errors_redirect_to_signin() {
        let (navigator, decider) = decider();
        decider
            .classify_frame_error(TokenErrorCode::NotLoggedIn, "nope".to_string())
            .apply(navigator.as_ref());

        assert_eq!(navigator.navigations().len(), 1);
        assert!(navigator.navigations()[0].starts_with("https://signin.blackbaud.com/signin/"));
    }

    #[test]
    fn frame_unknown_errors_redirect_to_security_page_with_their_code() {
        let (navigator, decider) = decider();
        decider
            .classify_frame_error(TokenErrorCode::Unknown, "boom".to_string())
            .apply(navigator.as_ref());

        assert_eq!(navigator.navigations().len(), 1);
        assert!(navigator.navigations()[0].ends_with("&code=unknown"));
    }
}
