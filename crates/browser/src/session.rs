use async_trait::async_trait;
use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

use crate::error::BrowserError;

/// How to address an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum By {
    Css(String),
    XPath(String),
}

impl By {
    pub fn css(selector: impl Into<String>) -> Self {
        By::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        By::XPath(expr.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            By::Css(s) | By::XPath(s) => s,
        }
    }
}

impl fmt::Display for By {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            By::Css(s) => write!(f, "css `{}`", s),
            By::XPath(s) => write!(f, "xpath `{}`", s),
        }
    }
}

/// One exclusive automation session: a single serialized sequence of
/// navigation, click and query operations.
///
/// Every method takes `&mut self`, so concurrent use of one session cannot
/// be expressed. `find` and `find_within` return `Ok(None)` when nothing
/// matches; errors are reserved for real command failures.
#[async_trait]
pub trait BrowserSession: Send {
    type Element: Clone + Send + Sync;

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;
    async fn current_url(&mut self) -> Result<String, BrowserError>;
    async fn page_source(&mut self) -> Result<String, BrowserError>;

    async fn find(&mut self, by: &By) -> Result<Option<Self::Element>, BrowserError>;
    async fn find_all(&mut self, by: &By) -> Result<Vec<Self::Element>, BrowserError>;
    async fn find_within(
        &mut self,
        parent: &Self::Element,
        by: &By,
    ) -> Result<Option<Self::Element>, BrowserError>;

    async fn is_displayed(&mut self, element: &Self::Element) -> Result<bool, BrowserError>;
    async fn is_enabled(&mut self, element: &Self::Element) -> Result<bool, BrowserError>;
    async fn text(&mut self, element: &Self::Element) -> Result<String, BrowserError>;
    async fn attr(
        &mut self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, BrowserError>;

    async fn click(&mut self, element: &Self::Element) -> Result<(), BrowserError>;
    /// Click through JavaScript, bypassing overlay hit-testing.
    async fn js_click(&mut self, element: &Self::Element) -> Result<(), BrowserError>;

    async fn scroll_into_view(&mut self, element: &Self::Element) -> Result<(), BrowserError>;
    async fn scroll_by(&mut self, dy: i64) -> Result<(), BrowserError>;
    async fn scroll_to_bottom(&mut self) -> Result<(), BrowserError>;
    async fn scroll_element_to_bottom(
        &mut self,
        element: &Self::Element,
    ) -> Result<(), BrowserError>;

    async fn press_escape(&mut self) -> Result<(), BrowserError>;

    /// End the session. Called exactly once, by [`ScopedSession`].
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Opens fresh sessions; one per source run.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession + 'static;

    async fn open(&self) -> Result<Self::Session, BrowserError>;
}

/// Owning handle that guarantees a session is closed on every exit path.
///
/// Normal paths call [`ScopedSession::release`]. If the handle is dropped
/// without being released (an early return through `?`, a panic, or the
/// owning task being dropped) the close is scheduled on the current tokio
/// runtime instead.
pub struct ScopedSession<S: BrowserSession + 'static> {
    inner: Option<S>,
    label: &'static str,
}

impl<S: BrowserSession + 'static> ScopedSession<S> {
    pub async fn acquire<F>(factory: &F, label: &'static str) -> Result<Self, BrowserError>
    where
        F: SessionFactory<Session = S> + ?Sized,
    {
        let session = factory.open().await?;
        debug!(session = label, "Browser session opened");
        Ok(Self::wrap(session, label))
    }

    pub fn wrap(session: S, label: &'static str) -> Self {
        Self {
            inner: Some(session),
            label,
        }
    }

    pub async fn release(mut self) {
        if let Some(mut session) = self.inner.take() {
            match session.close().await {
                Ok(()) => debug!(session = self.label, "Browser session closed"),
                Err(e) => warn!(session = self.label, error = %e, "Failed to close browser session"),
            }
        }
    }
}

impl<S: BrowserSession + 'static> Deref for ScopedSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.inner.as_ref().expect("session is present until release")
    }
}

impl<S: BrowserSession + 'static> DerefMut for ScopedSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.inner.as_mut().expect("session is present until release")
    }
}

impl<S: BrowserSession + 'static> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        let label = self.label;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session = label, "Browser session dropped without release, closing in background");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(session = label, error = %e, "Background close failed");
                    }
                });
            }
            Err(_) => {
                warn!(session = label, "No runtime available, browser session leaked");
            }
        }
    }
}
