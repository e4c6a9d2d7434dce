//! Shared User-Agent string for page-fetch and provider HTTP clients.
//!
//! Single source for the UA format so page downloads and site-adapter
//! traffic stay consistent and easy to update (good citizenship; RFC 9308).

/// Default User-Agent identifying the tool.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("mangadl/{version} (personal-library-tool)")
}
