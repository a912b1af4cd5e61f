use async_trait::async_trait;
use browser::{BrowserError, BrowserSession};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use crate::schema::{JobRecord, JobSource, SearchCriteria};

/// One site's extraction run, from navigation to normalized records.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    fn source(&self) -> JobSource;

    async fn extract(&self, criteria: &SearchCriteria) -> Result<Vec<JobRecord>, ScrapeError>;
}

/// Progress of one source run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NavigateToSearch,
    DismissOverlay,
    WaitForListingContainer,
    IncrementalLoad,
    IterateItems,
    ExpandItemDetail,
    ExtractFields,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::NavigateToSearch => "navigate to search",
            Stage::DismissOverlay => "dismiss overlay",
            Stage::WaitForListingContainer => "wait for listing",
            Stage::IncrementalLoad => "incremental load",
            Stage::IterateItems => "iterate items",
            Stage::ExpandItemDetail => "expand item detail",
            Stage::ExtractFields => "extract fields",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Source-level failure: the whole source yields no records.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("could not open browser session: {0}")]
    Session(#[source] BrowserError),

    #[error("{stage} failed: {source}")]
    Browser {
        stage: Stage,
        #[source]
        source: BrowserError,
    },

    #[error("listing container did not appear within {0:?}")]
    ListingTimeout(Duration),

    #[error("could not build search url: {0}")]
    Url(#[from] url::ParseError),
}

/// Why a single listing item produced no record.
#[derive(Debug, Error)]
pub enum ItemSkip {
    #[error("could not open item: {0}")]
    ClickFailed(#[source] BrowserError),

    #[error("detail pane never appeared")]
    DetailTimeout,

    #[error("browser command failed: {0}")]
    Browser(#[source] BrowserError),
}

#[derive(Debug)]
pub(crate) enum ItemError {
    Skip(ItemSkip),
    Fatal(BrowserError),
}

impl ItemError {
    pub(crate) fn click(err: BrowserError) -> Self {
        if err.is_fatal() {
            ItemError::Fatal(err)
        } else {
            ItemError::Skip(ItemSkip::ClickFailed(err))
        }
    }
}

impl From<BrowserError> for ItemError {
    fn from(err: BrowserError) -> Self {
        if err.is_fatal() {
            ItemError::Fatal(err)
        } else {
            ItemError::Skip(ItemSkip::Browser(err))
        }
    }
}

/// Wait budgets for one site. Every wait in an extraction run is bounded
/// by one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteTimeouts {
    pub dismiss: Duration,
    pub listing: Duration,
    pub detail: Duration,
    pub show_more: Duration,
    pub expanded: Duration,
    pub load_step: Duration,
    pub load_settle: Duration,
    pub load_budget: Duration,
    pub pause: Duration,
}

impl SiteTimeouts {
    pub fn linkedin() -> Self {
        Self {
            dismiss: Duration::from_secs(10),
            listing: Duration::from_secs(20),
            detail: Duration::from_secs(55),
            show_more: Duration::from_secs(10),
            expanded: Duration::from_secs(20),
            load_step: Duration::from_secs(10),
            load_settle: Duration::from_millis(500),
            load_budget: Duration::from_secs(60),
            pause: Duration::from_secs(1),
        }
    }

    pub fn glassdoor() -> Self {
        Self {
            dismiss: Duration::from_secs(10),
            listing: Duration::from_secs(30),
            detail: Duration::from_secs(10),
            show_more: Duration::from_secs(5),
            expanded: Duration::from_secs(5),
            load_step: Duration::from_secs(10),
            load_settle: Duration::from_secs(3),
            load_budget: Duration::from_secs(60),
            pause: Duration::from_secs(1),
        }
    }
}

/// Stage tracker for one run; stage changes are logged.
pub(crate) struct RunState {
    source: JobSource,
    stage: Stage,
    pub(crate) skipped: usize,
}

impl RunState {
    pub(crate) fn new(source: JobSource) -> Self {
        Self {
            source,
            stage: Stage::NavigateToSearch,
            skipped: 0,
        }
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        if self.stage != stage {
            debug!(source = %self.source, from = %self.stage, to = %stage, "Stage transition");
        }
        self.stage = stage;
    }

    pub(crate) fn fail(&mut self, err: BrowserError) -> ScrapeError {
        let stage = self.stage;
        self.enter(Stage::Failed);
        ScrapeError::Browser { stage, source: err }
    }

    pub(crate) fn fail_with(&mut self, err: ScrapeError) -> ScrapeError {
        self.enter(Stage::Failed);
        err
    }
}

/// Click, and on an intercepted click scroll a little and try once more.
pub(crate) async fn click_with_retry<S>(
    session: &mut S,
    element: &S::Element,
    pause: Duration,
) -> Result<(), BrowserError>
where
    S: BrowserSession + ?Sized,
{
    match session.click(element).await {
        Err(e) if e.is_click_intercepted() => {
            debug!("Click intercepted, scrolling and retrying");
            session.scroll_by(100).await?;
            sleep(pause).await;
            session.click(element).await
        }
        other => other,
    }
}
