//! User-Agent string sent with every page request.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/mango";

/// Default User-Agent for page requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("mango/{version} (+{PROJECT_UA_URL})")
}
