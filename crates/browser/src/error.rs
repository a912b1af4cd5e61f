use std::time::Duration;

use thiserror::Error;

/// Errors raised by an automation session.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("could not start browser session: {0}")]
    Launch(String),

    #[error("browser session is gone: {0}")]
    SessionLost(String),

    #[error("no element matches {selector}")]
    NotFound { selector: String },

    #[error("click on {target} was intercepted by another element")]
    ClickIntercepted { target: String },

    #[error("element is no longer attached to the page")]
    Stale,

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("script failed: {0}")]
    Script(String),

    #[error("webdriver command failed: {0}")]
    Command(String),
}

impl BrowserError {
    /// True when the session itself can no longer be driven.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrowserError::Launch(_) | BrowserError::SessionLost(_))
    }

    pub fn is_click_intercepted(&self) -> bool {
        matches!(self, BrowserError::ClickIntercepted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_session_errors_are_fatal() {
        assert!(BrowserError::SessionLost("connection reset".into()).is_fatal());
        assert!(BrowserError::Launch("no chromedriver".into()).is_fatal());
        assert!(!BrowserError::Stale.is_fatal());
        assert!(!BrowserError::NotFound { selector: "div".into() }.is_fatal());
    }
}
