pub mod error;
pub mod loader;
pub mod locator;
pub mod session;
pub mod webdriver;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::BrowserError;
pub use loader::{IncrementalLoader, LoadReport, LoadTrigger, LoaderConfig, StopReason};
pub use locator::{Condition, Dismissal, FieldValue, Located, Locator, Strategy};
pub use session::{BrowserSession, By, ScopedSession, SessionFactory};
pub use webdriver::{BrowserOptions, WebDriverFactory, WebDriverSession};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFactory, FakeSession};

    #[tokio::test]
    async fn test_released_session_is_closed_once() {
        let session = FakeSession::new();
        let factory = FakeFactory::new(vec![session.clone()]);

        let scoped = ScopedSession::acquire(&factory, "test").await.unwrap();
        scoped.release().await;

        assert_eq!(session.dom().closes, 1);
    }

    #[tokio::test]
    async fn test_dropped_session_is_closed_in_background() {
        let session = FakeSession::new();
        let scoped = ScopedSession::wrap(session.clone(), "test");
        drop(scoped);

        // let the spawned close run
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(session.dom().closes, 1);
    }

    #[tokio::test]
    async fn test_panicking_owner_still_closes_session() {
        let session = FakeSession::new();
        let shared = session.clone();

        let handle = tokio::spawn(async move {
            let mut scoped = ScopedSession::wrap(shared, "test");
            scoped.goto("https://example.com").await.unwrap();
            panic!("extraction blew up");
        });
        assert!(handle.await.is_err());

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.dom().closes, 1);
        assert_eq!(session.dom().visited, vec!["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_exhausted_factory_reports_launch_error() {
        let factory = FakeFactory::new(Vec::new());
        let err = ScopedSession::acquire(&factory, "test").await.err().unwrap();
        assert!(err.is_fatal());
    }
}
