//! Test doubles shared across the workspace.

use parking_lot::Mutex;

use crate::navigation::Navigator;

/// [`Navigator`] double that records navigations instead of performing them.
#[derive(Debug)]
pub struct RecordingNavigator {
    current_url: String,
    navigations: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    /// Navigator reporting `current_url` as the page the user is on.
    #[must_use]
    pub fn at(current_url: impl Into<String>) -> Self {
        Self { current_url: current_url.into(), navigations: Mutex::new(Vec::new()) }
    }

    /// Every navigation performed so far, in order.
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_url(&self) -> String {
        self.current_url.clone()
    }

    fn navigate(&self, url: &str) {
        self.navigations.lock().push(url.to_string());
    }
}
