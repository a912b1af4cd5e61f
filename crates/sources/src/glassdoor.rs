use async_trait::async_trait;
use browser::{
    BrowserSession, By, IncrementalLoader, LoadTrigger, LoaderConfig, Locator, ScopedSession,
    SessionFactory, Strategy,
};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::extractor::{
    click_with_retry, ItemError, ItemSkip, RunState, ScrapeError, SiteTimeouts, SourceExtractor,
    Stage,
};
use crate::fields::{FieldRule, PageSnapshot};
use crate::location::{resolve_or_default, LocationResolver};
use crate::schema::{JobRecord, JobSource, SearchCriteria};

pub const BASE_URL: &str = "https://www.glassdoor.com";

pub const COOKIE_BANNER: &str = "button#onetrust-accept-btn-handler";
pub const LISTING: &str = "ul.jobsList, ul[aria-label='Jobs List']";
pub const CARDS: &str = "li.react-job-listing, li[data-test='jobListing']";
pub const LOAD_MORE: &str = "button.jobsearch-LoadMoreJobs, button[data-test='load-more-jobs']";
pub const CARD_TITLE_LINK: &str = "a[data-test='job-title'], a.jobTitle, a.jobCard_jobTitle";
pub const DETAIL_MARKER: &str =
    "div.TwoColumnLayout_columnRight__GRvqO, div.TwoColumnLayout_jobDetailsContainer__qyvJZ";
pub const POPUP_DISMISS_XPATH: &str = "//button[contains(text(), 'Dismiss')]";
pub const POPUP_CLOSE: &str = "button[aria-label='Close']";
pub const SHOW_MORE: &str = "button[data-test='show-more-cta'][aria-expanded='false']";
pub const SHOW_LESS: &str = "button[data-test='show-more-cta'][aria-expanded='true']";

const TITLE: FieldRule = FieldRule::inline("job_title", &["h1[id^='jd-job-title']"]);
const COMPANY: FieldRule = FieldRule::inline("company", &["h4[class*='heading_Subhead']"]);
const LOCATION: FieldRule =
    FieldRule::inline("location", &["div[data-test='location']", "div.companyLocation"]);
const SALARY: FieldRule =
    FieldRule::inline("salary", &["div[data-test='detailSalary']", "div.salaryEstimate"]);
const DESCRIPTION: FieldRule =
    FieldRule::lines("description", &["div.JobDetails_jobDescription__uW_fK > div"]);

/// Glassdoor's search path encodes the character spans of the location
/// and keyword slugs next to the location id.
pub fn search_url(position: &str, location: &str, location_id: &str) -> Result<Url, url::ParseError> {
    let position_slug = position.replace(' ', "-");
    let location_slug = location.replace([' ', ','], "-");
    let loc_len = location_slug.chars().count();
    let pos_len = position_slug.chars().count();

    Url::parse(&format!(
        "{BASE_URL}/Job/{location_slug}-{position_slug}-jobs-SRCH_IL.0,{loc_len}_IC{location_id}_KO{},{}.htm",
        loc_len + 1,
        loc_len + 1 + pos_len
    ))
}

/// Build a record from the rendered detail pane.
pub fn parse_detail(html: &str, apply_link: String, criteria: &SearchCriteria) -> JobRecord {
    let page = PageSnapshot::parse(html);

    JobRecord {
        job_title: page.resolve(&TITLE).or_fallback(&criteria.position).into_string(),
        company: page.resolve(&COMPANY).or_fallback("N/A").into_string(),
        experience: criteria.experience.clone(),
        description: page.resolve(&DESCRIPTION).or_fallback("").into_string(),
        job_nature: criteria.job_nature.clone(),
        location: page.resolve(&LOCATION).or_fallback(&criteria.location).into_string(),
        salary: page.resolve(&SALARY).or_fallback(&criteria.salary).into_string(),
        apply_link,
        source: None,
    }
}

pub struct GlassdoorExtractor<F> {
    factory: F,
    locations: Arc<dyn LocationResolver>,
    timeouts: SiteTimeouts,
    locator: Locator,
}

impl<F: SessionFactory> GlassdoorExtractor<F> {
    pub fn new(factory: F, locations: Arc<dyn LocationResolver>, timeouts: SiteTimeouts) -> Self {
        Self {
            factory,
            locations,
            timeouts,
            locator: Locator::default(),
        }
    }

    async fn scrape(
        &self,
        session: &mut F::Session,
        url: &Url,
        criteria: &SearchCriteria,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let mut run = RunState::new(JobSource::Glassdoor);

        // Step 1: Open the search results
        session.goto(url.as_str()).await.map_err(|e| run.fail(e))?;
        info!(url = %url, "Opened Glassdoor search");

        // Step 2: Accept the cookie banner if it shows up
        run.enter(Stage::DismissOverlay);
        let banner = [Strategy::clickable(By::css(COOKIE_BANNER), self.timeouts.dismiss)];
        let dismissal = self.locator.dismiss(session, &banner, false).await;
        debug!(?dismissal, "Cookie banner handled");

        // Step 3: Wait for the job list
        run.enter(Stage::WaitForListingContainer);
        let listing = Strategy::present(By::css(LISTING), self.timeouts.listing);
        if self.locator.wait_for(session, &listing).await.is_none() {
            return Err(run.fail_with(ScrapeError::ListingTimeout(self.timeouts.listing)));
        }

        // Step 4: Scroll the list and press "load more" until it stops growing
        run.enter(Stage::IncrementalLoad);
        let loader = IncrementalLoader::new(
            LoaderConfig {
                items: By::css(CARDS),
                trigger: LoadTrigger::ScrollContainer {
                    container: By::css(LISTING),
                    load_more: Some(By::css(LOAD_MORE)),
                },
                settle: self.timeouts.load_settle,
                step_timeout: self.timeouts.load_step,
                budget: self.timeouts.load_budget,
            },
            self.locator.clone(),
        );
        loader.load_all(session).await;

        // Step 5: Open and read every card
        run.enter(Stage::IterateItems);
        let cards = session
            .find_all(&By::css(CARDS))
            .await
            .map_err(|e| run.fail(e))?;
        let total = cards.len();
        let mut records = Vec::with_capacity(total);

        for (index, card) in cards.iter().enumerate() {
            match self.extract_item(session, card, criteria, &mut run).await {
                Ok(record) => {
                    debug!(item = index + 1, total, title = %record.job_title, "Collected posting");
                    records.push(record);
                }
                Err(ItemError::Skip(reason)) => {
                    run.skipped += 1;
                    warn!(item = index + 1, total, reason = %reason, "Skipping posting");
                }
                Err(ItemError::Fatal(e)) => return Err(run.fail(e)),
            }
            run.enter(Stage::IterateItems);
        }

        run.enter(Stage::Done);
        info!(
            records = records.len(),
            skipped = run.skipped,
            "Glassdoor extraction finished"
        );
        Ok(records)
    }

    async fn extract_item(
        &self,
        session: &mut F::Session,
        card: &<F::Session as BrowserSession>::Element,
        criteria: &SearchCriteria,
        run: &mut RunState,
    ) -> Result<JobRecord, ItemError> {
        run.enter(Stage::ExpandItemDetail);
        session.scroll_into_view(card).await?;
        sleep(self.timeouts.pause).await;

        // the title link opens the detail pane; the card itself is the fallback target
        let target = match session.find_within(card, &By::css(CARD_TITLE_LINK)).await? {
            Some(link) => link,
            None => card.clone(),
        };
        click_with_retry(session, &target, self.timeouts.pause)
            .await
            .map_err(ItemError::click)?;

        let marker = Strategy::present(By::css(DETAIL_MARKER), self.timeouts.detail);
        if self.locator.wait_for(session, &marker).await.is_none() {
            return Err(ItemError::Skip(ItemSkip::DetailTimeout));
        }
        sleep(self.timeouts.pause).await;

        let closed = self
            .locator
            .click_if_present(session, &[By::xpath(POPUP_DISMISS_XPATH), By::css(POPUP_CLOSE)])
            .await;
        if closed > 0 {
            debug!(closed, "Closed popups over the detail pane");
        }

        self.expand_description(session).await;

        run.enter(Stage::ExtractFields);
        let html = session.page_source().await?;
        let apply_link = session.current_url().await?;

        Ok(parse_detail(&html, apply_link, criteria))
    }

    /// Best effort; an intercepted click is retried as a script click.
    async fn expand_description(&self, session: &mut F::Session) -> bool {
        let button = Strategy::clickable(By::css(SHOW_MORE), self.timeouts.show_more);
        let Some(button) = self.locator.wait_for(session, &button).await else {
            return false;
        };
        if let Err(e) = session.scroll_into_view(&button).await {
            debug!(error = %e, "Could not scroll to show-more");
        }
        sleep(self.timeouts.pause).await;

        let clicked = match session.click(&button).await {
            Err(e) if e.is_click_intercepted() => session.js_click(&button).await,
            other => other,
        };
        if let Err(e) = clicked {
            debug!(error = %e, "Show-more click failed");
            return false;
        }

        let expanded = Strategy::present(By::css(SHOW_LESS), self.timeouts.expanded);
        self.locator.wait_for(session, &expanded).await.is_some()
    }
}

#[async_trait]
impl<F: SessionFactory> SourceExtractor for GlassdoorExtractor<F> {
    fn source(&self) -> JobSource {
        JobSource::Glassdoor
    }

    async fn extract(&self, criteria: &SearchCriteria) -> Result<Vec<JobRecord>, ScrapeError> {
        let location_id = resolve_or_default(self.locations.as_ref(), &criteria.location).await;
        let url = search_url(&criteria.position, &criteria.location, &location_id)?;

        let mut session = ScopedSession::acquire(&self.factory, "glassdoor")
            .await
            .map_err(ScrapeError::Session)?;
        let outcome = self.scrape(&mut session, &url, criteria).await;
        session.release().await;
        outcome
    }
}
