//! Ordered, first-success-wins element lookup against a live session.

use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::session::{BrowserSession, By};

/// What must hold for a located element to count as found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Present,
    Clickable,
}

/// One lookup attempt: a selector, the condition it must satisfy and how
/// long to keep polling for it.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub by: By,
    pub condition: Condition,
    pub timeout: Duration,
}

impl Strategy {
    pub fn new(by: By, condition: Condition, timeout: Duration) -> Self {
        Self {
            by,
            condition,
            timeout,
        }
    }

    pub fn present(by: By, timeout: Duration) -> Self {
        Self::new(by, Condition::Present, timeout)
    }

    pub fn clickable(by: By, timeout: Duration) -> Self {
        Self::new(by, Condition::Clickable, timeout)
    }
}

/// Result of a lookup. Not finding anything is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Located<T> {
    Found { value: T, strategy: usize },
    NotFound,
}

impl<T> Located<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Located::Found { .. })
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Located::Found { value, .. } => Some(value),
            Located::NotFound => None,
        }
    }

    pub fn or_fallback(self, fallback: impl Into<String>) -> FieldValue
    where
        T: Into<String>,
    {
        match self {
            Located::Found { value, .. } => FieldValue::Scraped(value.into()),
            Located::NotFound => FieldValue::Fallback(fallback.into()),
        }
    }
}

/// A record field that was either read from the page or substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Scraped(String),
    Fallback(String),
}

impl FieldValue {
    pub fn is_scraped(&self) -> bool {
        matches!(self, FieldValue::Scraped(_))
    }

    pub fn into_string(self) -> String {
        match self {
            FieldValue::Scraped(s) | FieldValue::Fallback(s) => s,
        }
    }
}

/// How an overlay was (or was not) dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismissal {
    Clicked { strategy: usize },
    Escaped,
    Untouched,
}

/// Polling resolver shared by every site extractor.
#[derive(Debug, Clone)]
pub struct Locator {
    poll_interval: Duration,
}

impl Default for Locator {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl Locator {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Try each strategy in order and return the first element that
    /// satisfies its condition within that strategy's timeout.
    pub async fn first_match<S>(&self, session: &mut S, strategies: &[Strategy]) -> Located<S::Element>
    where
        S: BrowserSession + ?Sized,
    {
        for (index, strategy) in strategies.iter().enumerate() {
            if let Some(element) = self.wait_for(session, strategy).await {
                return Located::Found {
                    value: element,
                    strategy: index,
                };
            }
            debug!(selector = %strategy.by, "Strategy exhausted, trying next");
        }
        Located::NotFound
    }

    /// Poll a single strategy until it holds or its timeout runs out.
    pub async fn wait_for<S>(&self, session: &mut S, strategy: &Strategy) -> Option<S::Element>
    where
        S: BrowserSession + ?Sized,
    {
        let deadline = Instant::now() + strategy.timeout;
        loop {
            match session.find(&strategy.by).await {
                Ok(Some(element)) => {
                    if self.holds(session, &element, strategy.condition).await {
                        return Some(element);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(selector = %strategy.by, error = %e, "Lookup failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Number of elements currently matching `by`; lookup errors count as zero.
    pub async fn count<S>(&self, session: &mut S, by: &By) -> usize
    where
        S: BrowserSession + ?Sized,
    {
        match session.find_all(by).await {
            Ok(elements) => elements.len(),
            Err(e) => {
                debug!(selector = %by, error = %e, "Count lookup failed");
                0
            }
        }
    }

    /// Wait until more than `baseline` elements match `by`.
    pub async fn wait_for_count_above<S>(
        &self,
        session: &mut S,
        by: &By,
        baseline: usize,
        timeout: Duration,
    ) -> bool
    where
        S: BrowserSession + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count(session, by).await > baseline {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Click the first dismiss control that becomes clickable, otherwise
    /// fall back to an Escape keystroke when `escape_fallback` is set.
    pub async fn dismiss<S>(
        &self,
        session: &mut S,
        strategies: &[Strategy],
        escape_fallback: bool,
    ) -> Dismissal
    where
        S: BrowserSession + ?Sized,
    {
        if let Located::Found { value, strategy } = self.first_match(session, strategies).await {
            match session.click(&value).await {
                Ok(()) => return Dismissal::Clicked { strategy },
                Err(e) => debug!(error = %e, "Dismiss click failed"),
            }
        }

        if escape_fallback {
            match session.press_escape().await {
                Ok(()) => return Dismissal::Escaped,
                Err(e) => debug!(error = %e, "Escape keystroke failed"),
            }
        }

        Dismissal::Untouched
    }

    /// Click every control that is present right now, without waiting.
    /// Returns how many were clicked.
    pub async fn click_if_present<S>(&self, session: &mut S, selectors: &[By]) -> usize
    where
        S: BrowserSession + ?Sized,
    {
        let mut clicked = 0;
        for by in selectors {
            if let Ok(Some(element)) = session.find(by).await {
                if session.click(&element).await.is_ok() {
                    clicked += 1;
                }
            }
        }
        clicked
    }

    async fn holds<S>(&self, session: &mut S, element: &S::Element, condition: Condition) -> bool
    where
        S: BrowserSession + ?Sized,
    {
        match condition {
            Condition::Present => true,
            Condition::Clickable => {
                session.is_displayed(element).await.unwrap_or(false)
                    && session.is_enabled(element).await.unwrap_or(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeElement, FakeSession};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_skips_missing_strategies() {
        let mut session = FakeSession::new();
        session.dom().insert("button.second", vec![FakeElement::new("Dismiss")]);

        let strategies = vec![
            Strategy::clickable(By::css("button.first"), secs(10)),
            Strategy::clickable(By::css("button.second"), secs(10)),
        ];

        let start = Instant::now();
        let located = Locator::default().first_match(&mut session, &strategies).await;

        assert!(matches!(located, Located::Found { strategy: 1, .. }));
        // the first strategy waited out its full timeout
        assert!(start.elapsed() >= secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_element_is_not_clickable() {
        let mut session = FakeSession::new();
        session
            .dom()
            .insert("button.hidden", vec![FakeElement::new("x").hidden()]);

        let strategies = vec![Strategy::clickable(By::css("button.hidden"), secs(2))];
        let located = Locator::default().first_match(&mut session, &strategies).await;
        assert_eq!(located, Located::NotFound);

        let present = vec![Strategy::present(By::css("button.hidden"), secs(2))];
        assert!(Locator::default().first_match(&mut session, &present).await.is_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_falls_back_to_escape() {
        let mut session = FakeSession::new();
        let strategies = vec![
            Strategy::clickable(By::css("button.modal__dismiss"), secs(1)),
            Strategy::clickable(By::css("button[aria-label='Dismiss']"), secs(1)),
        ];

        let outcome = Locator::default().dismiss(&mut session, &strategies, true).await;
        assert_eq!(outcome, Dismissal::Escaped);
        assert_eq!(session.dom().escape_presses, 1);

        let outcome = Locator::default().dismiss(&mut session, &strategies, false).await;
        assert_eq!(outcome, Dismissal::Untouched);
    }

    #[test]
    fn test_not_found_substitutes_fallback() {
        let missing: Located<String> = Located::NotFound;
        assert_eq!(missing.or_fallback("Lahore"), FieldValue::Fallback("Lahore".into()));

        let found = Located::Found {
            value: "Karachi".to_string(),
            strategy: 0,
        };
        assert!(found.or_fallback("Lahore").is_scraped());
    }
}
