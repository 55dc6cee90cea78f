//! Outbound navigation seam.
//!
//! The library never performs navigation itself; it asks a [`Navigator`] to.
//! Hosts wire this to their location primitive, tests wire it to
//! [`crate::testing::RecordingNavigator`].

/// Collaborator that owns the page location.
///
/// Implementations must be cheap to call and must not block; `navigate` is a
/// fire-and-forget side effect from the library's point of view.
pub trait Navigator: Send + Sync {
    /// URL of the page the user is currently on, used as the return target
    /// for sign-in redirects and as context on error pages.
    fn current_url(&self) -> String;

    /// Perform a full-page navigation to `url`.
    fn navigate(&self, url: &str);
}
