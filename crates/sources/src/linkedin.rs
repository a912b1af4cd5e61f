use async_trait::async_trait;
use browser::{
    BrowserSession, By, IncrementalLoader, LoadTrigger, LoaderConfig, Locator, ScopedSession,
    SessionFactory, Strategy,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::extractor::{
    click_with_retry, ItemError, ItemSkip, RunState, ScrapeError, SiteTimeouts, SourceExtractor,
    Stage,
};
use crate::fields::{FieldRule, PageSnapshot};
use crate::schema::{JobRecord, JobSource, SearchCriteria};

pub const SEARCH_URL: &str = "https://www.linkedin.com/jobs/search/";

pub const DISMISS_BUTTONS: [&str; 3] = [
    "button[data-tracking-control-name='public_jobs_contextual-sign-in-modal_modal_dismiss']",
    "button.modal__dismiss",
    "button[aria-label='Dismiss']",
];
pub const LISTING_MARKER: &str = "div.job-search-card";
pub const JOB_LINKS: &str = "a.base-card__full-link";
pub const DETAIL_MARKER: &str = "h2.top-card-layout__title";
pub const SHOW_MORE: &str =
    "button.show-more-less-html__button.show-more-less-button[aria-expanded='false']";
pub const SHOW_LESS: &str =
    "button.show-more-less-html__button.show-more-less-button[aria-expanded='true']";

const TITLE: FieldRule = FieldRule::inline("job_title", &["h2.top-card-layout__title"]);
const COMPANY: FieldRule = FieldRule::inline(
    "company",
    &[
        "span.topcard__flavor",
        "a.topcard__org-name-link.topcard__flavor--black-link",
    ],
);
const LOCATION: FieldRule =
    FieldRule::inline("location", &["span.topcard__flavor.topcard__flavor--bullet"]);
const DESCRIPTION: FieldRule =
    FieldRule::lines("description", &["div.description__text.description__text--rich"]);

pub fn search_url(criteria: &SearchCriteria) -> Result<Url, url::ParseError> {
    Url::parse_with_params(
        SEARCH_URL,
        &[
            ("keywords", criteria.position.as_str()),
            ("location", criteria.location.as_str()),
        ],
    )
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
        salary: criteria.salary.clone(),
        apply_link,
        source: None,
    }
}

pub struct LinkedInExtractor<F> {
    factory: F,
    timeouts: SiteTimeouts,
    locator: Locator,
}

impl<F: SessionFactory> LinkedInExtractor<F> {
    pub fn new(factory: F, timeouts: SiteTimeouts) -> Self {
        Self {
            factory,
            timeouts,
            locator: Locator::default(),
        }
    }

    async fn scrape(
        &self,
        session: &mut F::Session,
        criteria: &SearchCriteria,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let mut run = RunState::new(JobSource::LinkedIn);

        // Step 1: Open the search results
        let url = search_url(criteria).map_err(|e| run.fail_with(e.into()))?;
        session.goto(url.as_str()).await.map_err(|e| run.fail(e))?;
        info!(url = %url, "Opened LinkedIn search");

        // Step 2: Get rid of the sign-in modal
        run.enter(Stage::DismissOverlay);
        let strategies: Vec<Strategy> = DISMISS_BUTTONS
            .iter()
            .map(|s| Strategy::clickable(By::css(*s), self.timeouts.dismiss))
            .collect();
        let dismissal = self.locator.dismiss(session, &strategies, true).await;
        debug!(?dismissal, "Sign-in modal handled");
        sleep(self.timeouts.pause).await;

        // Step 3: Wait for the result cards
        run.enter(Stage::WaitForListingContainer);
        let marker = Strategy::present(By::css(LISTING_MARKER), self.timeouts.listing);
        if self.locator.wait_for(session, &marker).await.is_none() {
            return Err(run.fail_with(ScrapeError::ListingTimeout(self.timeouts.listing)));
        }

        // Step 4: Scroll until the list stops growing
        run.enter(Stage::IncrementalLoad);
        let loader = IncrementalLoader::new(
            LoaderConfig {
                items: By::css(LISTING_MARKER),
                trigger: LoadTrigger::ScrollWindow,
                settle: self.timeouts.load_settle,
                step_timeout: self.timeouts.load_step,
                budget: self.timeouts.load_budget,
            },
            self.locator.clone(),
        );
        loader.load_all(session).await;

        // Step 5: Open and read every posting
        run.enter(Stage::IterateItems);
        let links = session
            .find_all(&By::css(JOB_LINKS))
            .await
            .map_err(|e| run.fail(e))?;
        let total = links.len();
        let mut records = Vec::with_capacity(total);

        for (index, link) in links.iter().enumerate() {
            match self.extract_item(session, link, criteria, &mut run).await {
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
            sleep(self.timeouts.pause).await;
        }

        run.enter(Stage::Done);
        info!(
            records = records.len(),
            skipped = run.skipped,
            "LinkedIn extraction finished"
        );
        Ok(records)
    }

    async fn extract_item(
        &self,
        session: &mut F::Session,
        link: &<F::Session as BrowserSession>::Element,
        criteria: &SearchCriteria,
        run: &mut RunState,
    ) -> Result<JobRecord, ItemError> {
        run.enter(Stage::ExpandItemDetail);
        session.scroll_into_view(link).await?;
        click_with_retry(session, link, self.timeouts.pause)
            .await
            .map_err(ItemError::click)?;

        let marker = Strategy::present(By::css(DETAIL_MARKER), self.timeouts.detail);
        if self.locator.wait_for(session, &marker).await.is_none() {
            return Err(ItemError::Skip(ItemSkip::DetailTimeout));
        }

        self.expand_description(session).await;

        run.enter(Stage::ExtractFields);
        let html = session.page_source().await?;
        let apply_link = match session.attr(link, "href").await? {
            Some(href) if !href.trim().is_empty() => href,
            _ => session.current_url().await?,
        };

        Ok(parse_detail(&html, apply_link, criteria))
    }

    /// Best effort: a missing or unclickable button leaves the description
    /// truncated.
    async fn expand_description(&self, session: &mut F::Session) -> bool {
        let button = Strategy::clickable(By::css(SHOW_MORE), self.timeouts.show_more);
        let Some(button) = self.locator.wait_for(session, &button).await else {
            return false;
        };
        if let Err(e) = session.scroll_into_view(&button).await {
            debug!(error = %e, "Could not scroll to show-more");
        }
        if let Err(e) = session.click(&button).await {
            debug!(error = %e, "Show-more click failed");
            return false;
        }
        let expanded = Strategy::present(By::css(SHOW_LESS), self.timeouts.expanded);
        self.locator.wait_for(session, &expanded).await.is_some()
    }
}

#[async_trait]
impl<F: SessionFactory> SourceExtractor for LinkedInExtractor<F> {
    fn source(&self) -> JobSource {
        JobSource::LinkedIn
    }

    async fn extract(&self, criteria: &SearchCriteria) -> Result<Vec<JobRecord>, ScrapeError> {
        let mut session = ScopedSession::acquire(&self.factory, "linkedin")
            .await
            .map_err(ScrapeError::Session)?;
        let outcome = self.scrape(&mut session, criteria).await;
        session.release().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser::testing::{ClickEffect, FakeElement, FakeFactory, FakeSession};

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            position: "Software Engineer".into(),
            experience: "2 years".into(),
            salary: "100k".into(),
            job_nature: "onsite".into(),
            location: "Lahore".into(),
            skills: "Python, SQL".into(),
        }
    }

    fn detail_html(title: &str, company: &str, description: &str) -> String {
        format!(
            r#"<html><body>
              <h2 class="top-card-layout__title">{title}</h2>
              <span class="topcard__flavor">{company}</span>
              <span class="topcard__flavor topcard__flavor--bullet">Lahore, Punjab, Pakistan</span>
              <div class="description__text description__text--rich"><p>{description}</p></div>
            </body></html>"#
        )
    }

    /// A results page with one card per posting; clicking a link renders
    /// that posting's detail pane.
    fn results_page(postings: &[(&str, &str, &str)]) -> FakeSession {
        let session = FakeSession::new();
        {
            let mut dom = session.dom();
            dom.insert(
                LISTING_MARKER,
                postings.iter().map(|_| FakeElement::new("card")).collect(),
            );
            let links: Vec<FakeElement> = postings
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    FakeElement::new("link")
                        .with_attr("href", format!("https://www.linkedin.com/jobs/view/{}", i + 1))
                })
                .collect();
            for (link, (title, company, description)) in links.iter().zip(postings) {
                dom.on_click(
                    link,
                    ClickEffect::new()
                        .insert(DETAIL_MARKER, vec![FakeElement::new(*title)])
                        .page_html(detail_html(title, company, description)),
                );
            }
            dom.insert(JOB_LINKS, links);
        }
        session
    }

    fn extractor(session: &FakeSession) -> LinkedInExtractor<FakeFactory> {
        LinkedInExtractor::new(
            FakeFactory::new(vec![session.clone()]),
            SiteTimeouts::linkedin(),
        )
    }

    #[test]
    fn test_search_url_is_encoded() {
        let url = search_url(&criteria()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.linkedin.com/jobs/search/?keywords=Software+Engineer&location=Lahore"
        );
    }

    #[test]
    fn test_parse_detail_falls_back_to_criteria() {
        let record = parse_detail("<html><body></body></html>", "https://x/1".into(), &criteria());
        assert_eq!(record.job_title, "Software Engineer");
        assert_eq!(record.company, "N/A");
        assert_eq!(record.location, "Lahore");
        assert_eq!(record.description, "");
        assert_eq!(record.salary, "100k");
        assert_eq!(record.apply_link, "https://x/1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_extracts_every_posting_and_closes_session() {
        let session = results_page(&[
            ("Software Engineer II", "Acme", "Build services in Python."),
            ("Backend Developer", "Globex", "SQL heavy role."),
        ]);

        let records = extractor(&session).extract(&criteria()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].job_title, "Software Engineer II");
        assert_eq!(records[0].company, "Acme");
        assert_eq!(records[0].location, "Lahore, Punjab, Pakistan");
        assert_eq!(records[0].apply_link, "https://www.linkedin.com/jobs/view/1");
        assert_eq!(records[1].description, "SQL heavy role.");
        assert!(records.iter().all(|r| r.source.is_none()));

        let dom = session.dom();
        assert_eq!(dom.closes, 1);
        assert_eq!(dom.escape_presses, 1);
        assert!(dom.visited[0].starts_with(SEARCH_URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_listing_fails_source_and_releases_session() {
        let session = FakeSession::new();

        let err = extractor(&session).extract(&criteria()).await.unwrap_err();

        assert!(matches!(err, ScrapeError::ListingTimeout(_)));
        assert_eq!(session.dom().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_without_detail_pane_is_skipped() {
        let session = results_page(&[("Software Engineer II", "Acme", "Python")]);
        {
            let mut dom = session.dom();
            let mut links = vec![
                FakeElement::new("broken").with_attr("href", "https://www.linkedin.com/jobs/view/99"),
            ];
            links.extend(dom.nodes(JOB_LINKS));
            dom.insert(JOB_LINKS, links);
        }

        let records = extractor(&session).extract(&criteria()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].job_title, "Software Engineer II");
    }

    #[tokio::test(start_paused = true)]
    async fn test_intercepted_click_is_retried_once() {
        let session = results_page(&[("Software Engineer II", "Acme", "Python")]);
        {
            let mut dom = session.dom();
            let link = dom.nodes(JOB_LINKS).remove(0);
            dom.intercept(&link, 1);
        }
        let records = extractor(&session).extract(&criteria()).await.unwrap();
        assert_eq!(records.len(), 1);

        let stubborn = results_page(&[("Software Engineer II", "Acme", "Python")]);
        {
            let mut dom = stubborn.dom();
            let link = dom.nodes(JOB_LINKS).remove(0);
            dom.intercept(&link, 2);
        }
        let records = extractor(&stubborn).extract(&criteria()).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(stubborn.dom().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_session_aborts_source() {
        let session = results_page(&[
            ("Software Engineer II", "Acme", "Python"),
            ("Backend Developer", "Globex", "SQL"),
        ]);
        // browser dies right after the first item click
        session.dom().lost_after_clicks = Some(1);

        let err = extractor(&session).extract(&criteria()).await.unwrap_err();

        assert!(matches!(err, ScrapeError::Browser { .. }));
        assert_eq!(session.dom().closes, 1);
    }
}
