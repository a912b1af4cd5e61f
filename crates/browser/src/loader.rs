use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::locator::Locator;
use crate::session::{BrowserSession, By};

/// What makes a lazily rendered listing materialize more items.
#[derive(Debug, Clone)]
pub enum LoadTrigger {
    /// Scroll the whole window to the bottom.
    ScrollWindow,
    /// Scroll a scrollable container to its end, then click a "load more"
    /// control if one is present and visible.
    ScrollContainer { container: By, load_more: Option<By> },
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub items: By,
    pub trigger: LoadTrigger,
    /// Pause after each trigger before measuring again.
    pub settle: Duration,
    /// How long one iteration waits for the count to grow.
    pub step_timeout: Duration,
    /// Wall-clock budget for the whole load.
    pub budget: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An iteration produced no new items.
    Converged,
    /// The wall-clock budget ran out first.
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub iterations: usize,
    pub initial_count: usize,
    pub final_count: usize,
    pub stopped: StopReason,
}

/// Drives a listing to its full size by alternating load triggers with
/// bounded waits for the item count to increase.
pub struct IncrementalLoader {
    config: LoaderConfig,
    locator: Locator,
}

impl IncrementalLoader {
    pub fn new(config: LoaderConfig, locator: Locator) -> Self {
        Self { config, locator }
    }

    pub async fn load_all<S>(&self, session: &mut S) -> LoadReport
    where
        S: BrowserSession + ?Sized,
    {
        let start = Instant::now();
        let budget = self.config.budget;
        let initial_count = self.locator.count(session, &self.config.items).await;
        let mut count = initial_count;
        let mut iterations = 0;

        let stopped = loop {
            if start.elapsed() >= budget {
                break StopReason::BudgetExhausted;
            }
            iterations += 1;

            self.trigger(session, budget.saturating_sub(start.elapsed())).await;

            let remaining = budget.saturating_sub(start.elapsed());
            let grew = self
                .locator
                .wait_for_count_above(
                    session,
                    &self.config.items,
                    count,
                    self.config.step_timeout.min(remaining),
                )
                .await;

            let current = self.locator.count(session, &self.config.items).await;
            debug!(iteration = iterations, before = count, after = current, "Load step");

            if !grew || current <= count {
                break StopReason::Converged;
            }
            count = current;
        };

        let final_count = self.locator.count(session, &self.config.items).await;
        info!(
            iterations,
            initial_count,
            final_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            stopped = ?stopped,
            "Listing load finished"
        );

        LoadReport {
            iterations,
            initial_count,
            final_count,
            stopped,
        }
    }

    async fn trigger<S>(&self, session: &mut S, remaining: Duration)
    where
        S: BrowserSession + ?Sized,
    {
        match &self.config.trigger {
            LoadTrigger::ScrollWindow => {
                if let Err(e) = session.scroll_to_bottom().await {
                    debug!(error = %e, "Window scroll failed");
                }
            }
            LoadTrigger::ScrollContainer { container, load_more } => {
                match session.find(container).await {
                    Ok(Some(element)) => {
                        if let Err(e) = session.scroll_element_to_bottom(&element).await {
                            debug!(error = %e, "Container scroll failed");
                        }
                    }
                    Ok(None) => debug!(selector = %container, "Listing container vanished"),
                    Err(e) => debug!(error = %e, "Container lookup failed"),
                }

                if let Some(load_more) = load_more {
                    if let Ok(Some(button)) = session.find(load_more).await {
                        if session.is_displayed(&button).await.unwrap_or(false) {
                            match session.click(&button).await {
                                Ok(()) => debug!("Clicked load-more control"),
                                Err(e) => debug!(error = %e, "Load-more click failed"),
                            }
                        }
                    }
                }
            }
        }

        sleep(self.config.settle.min(remaining)).await;
    }
}
