//! Page rendering capability.
//!
//! The orchestrator asks a [`Renderer`] for a fully loaded HTML document and does
//! not care whether a plain GET or a scripted browser produced it.

use crate::engine::client::PoliteClient;
use crate::engine::error::FetchError;
use crate::engine::profile::SiteProfile;

/// Produces the HTML of a page.
pub trait Renderer {
    fn render(&self, url: &str, profile: &SiteProfile) -> Result<String, FetchError>;

    /// Whether a failed page leaves the renderer in an untrusted state, so the
    /// whole run must stop instead of skipping the chapter.
    fn aborts_on_failure(&self) -> bool {
        false
    }
}

impl Renderer for PoliteClient {
    fn render(&self, url: &str, profile: &SiteProfile) -> Result<String, FetchError> {
        self.get_text(url, profile.encoding)
    }
}
