//! Security-token-service domain resolution.

/// Default security-token-service host.
const DEFAULT_STS_DOMAIN: &str = "https://sts.sky.blackbaud.com";

/// Resolved base domain of the security token service.
///
/// The CSRF-token-issuing endpoint is derived from this base. The default
/// points at the production service; tests and alternate environments
/// override it with [`StsDomain::with_base`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsDomain {
    base: String,
}

impl Default for StsDomain {
    fn default() -> Self {
        Self { base: DEFAULT_STS_DOMAIN.to_string() }
    }
}

impl StsDomain {
    /// Resolve against a non-default host (trailing slash stripped).
    #[must_use]
    pub fn with_base(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    /// Base URL of the security token service.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// URL of the CSRF-token-issuing endpoint.
    #[must_use]
    pub fn csrf_url(&self) -> String {
        format!("{}/session/csrf", self.base)
    }
}
