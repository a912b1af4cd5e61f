use serde::{Deserialize, Serialize};
use sources::{JobRecord, JobSource, SearchCriteria, SourceExtractor};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// What to do with postings that share an apply link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Return every posting.
    #[default]
    Keep,
    /// Keep the first posting for each apply link.
    ApplyLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Completed { records: usize },
    Failed { error: String },
    TimedOut { after_secs: u64 },
}

/// Outcome of one source for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: JobSource,
    #[serde(flatten)]
    pub status: SourceStatus,
    pub elapsed_ms: u64,
}

impl SourceReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, SourceStatus::Completed { .. })
    }
}

#[derive(Debug, Default)]
pub struct Gathered {
    pub records: Vec<JobRecord>,
    pub reports: Vec<SourceReport>,
}

/// Runs every registered source concurrently and merges their output in
/// registration order.
pub struct SourceCoordinator {
    extractors: Vec<Arc<dyn SourceExtractor>>,
    deadline: Option<Duration>,
    dedup: DedupPolicy,
}

impl SourceCoordinator {
    pub fn new(extractors: Vec<Arc<dyn SourceExtractor>>) -> Self {
        Self {
            extractors,
            deadline: None,
            dedup: DedupPolicy::Keep,
        }
    }

    /// Per-source wall-clock limit. A source that overruns contributes
    /// nothing; its task keeps running until it has closed its session.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn sources(&self) -> Vec<JobSource> {
        self.extractors.iter().map(|e| e.source()).collect()
    }

    pub async fn gather(&self, criteria: &SearchCriteria) -> Gathered {
        let started = Instant::now();
        let deadline_at = self.deadline.map(|d| started + d);

        // Step 1: Start every source on its own task
        let handles: Vec<_> = self
            .extractors
            .iter()
            .map(|extractor| {
                let extractor = Arc::clone(extractor);
                let criteria = criteria.clone();
                let source = extractor.source();
                let span = info_span!("source", source = %source);
                let handle = tokio::spawn(
                    async move { extractor.extract(&criteria).await }.instrument(span),
                );
                (source, handle)
            })
            .collect();

        // Step 2: Collect in registration order
        let mut gathered = Gathered::default();
        for (source, handle) in handles {
            let joined = match deadline_at {
                Some(at) => match timeout_at(at, handle).await {
                    Ok(joined) => Some(joined),
                    Err(_) => None,
                },
                None => Some(handle.await),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let status = match joined {
                Some(Ok(Ok(records))) => {
                    let count = records.len();
                    gathered
                        .records
                        .extend(records.into_iter().map(|r| r.tagged(source)));
                    info!(source = %source, records = count, elapsed_ms, "Source completed");
                    SourceStatus::Completed { records: count }
                }
                Some(Ok(Err(e))) => {
                    error!(source = %source, error = %e, elapsed_ms, "Source failed");
                    SourceStatus::Failed {
                        error: e.to_string(),
                    }
                }
                Some(Err(join_error)) => {
                    error!(source = %source, error = %join_error, "Source task aborted");
                    SourceStatus::Failed {
                        error: format!("source task aborted: {join_error}"),
                    }
                }
                None => {
                    let after_secs = self.deadline.map_or(0, |d| d.as_secs());
                    warn!(source = %source, after_secs, "Source exceeded its deadline");
                    SourceStatus::TimedOut { after_secs }
                }
            };

            gathered.reports.push(SourceReport {
                source,
                status,
                elapsed_ms,
            });
        }

        // Step 3: Optional duplicate removal
        if self.dedup == DedupPolicy::ApplyLink {
            let before = gathered.records.len();
            gathered.records = dedup_by_apply_link(gathered.records);
            info!(
                removed = before - gathered.records.len(),
                "Removed postings with duplicate apply links"
            );
        }

        gathered
    }
}

fn dedup_by_apply_link(records: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.apply_link.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use sources::ScrapeError;

    pub(crate) enum Behaviour {
        Records(Vec<JobRecord>),
        Fail,
        Panic,
        Hang,
    }

    pub(crate) struct Scripted {
        pub(crate) source: JobSource,
        pub(crate) behaviour: Behaviour,
        pub(crate) delay: Duration,
    }

    impl Scripted {
        pub(crate) fn new(source: JobSource, behaviour: Behaviour) -> Arc<dyn SourceExtractor> {
            Arc::new(Self {
                source,
                behaviour,
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl SourceExtractor for Scripted {
        fn source(&self) -> JobSource {
            self.source
        }

        async fn extract(&self, _criteria: &SearchCriteria) -> Result<Vec<JobRecord>, ScrapeError> {
            tokio::time::sleep(self.delay).await;
            match &self.behaviour {
                Behaviour::Records(records) => Ok(records.clone()),
                Behaviour::Fail => Err(ScrapeError::ListingTimeout(Duration::from_secs(20))),
                Behaviour::Panic => panic!("extractor bug"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    pub(crate) fn criteria() -> SearchCriteria {
        SearchCriteria {
            position: "Software Engineer".into(),
            experience: "2 years".into(),
            salary: "100k".into(),
            job_nature: "onsite".into(),
            location: "Lahore".into(),
            skills: "Python, SQL".into(),
        }
    }

    pub(crate) fn record(title: &str, link: &str) -> JobRecord {
        JobRecord {
            job_title: title.into(),
            company: "Acme".into(),
            experience: "2 years".into(),
            description: format!("{title} role"),
            job_nature: "onsite".into(),
            location: "Lahore".into(),
            salary: "100k".into(),
            apply_link: link.into(),
            source: None,
        }
    }

    #[tokio::test]
    async fn test_merges_in_registration_order_and_tags() {
        let coordinator = SourceCoordinator::new(vec![
            Arc::new(Scripted {
                source: JobSource::LinkedIn,
                behaviour: Behaviour::Records(vec![record("a1", "l/1"), record("a2", "l/2")]),
                // finishes last but still comes first
                delay: Duration::from_millis(50),
            }) as Arc<dyn SourceExtractor>,
            Scripted::new(JobSource::Glassdoor, Behaviour::Records(vec![record("b1", "g/1")])),
        ]);

        let gathered = coordinator.gather(&criteria()).await;

        let titles: Vec<_> = gathered.records.iter().map(|r| r.job_title.as_str()).collect();
        assert_eq!(titles, vec!["a1", "a2", "b1"]);
        let tags: Vec<_> = gathered.records.iter().map(|r| r.source).collect();
        assert_eq!(
            tags,
            vec![Some(JobSource::LinkedIn), Some(JobSource::LinkedIn), Some(JobSource::Glassdoor)]
        );
        assert!(gathered.reports.iter().all(SourceReport::is_completed));
    }

    #[tokio::test]
    async fn test_failed_source_does_not_affect_sibling() {
        let coordinator = SourceCoordinator::new(vec![
            Scripted::new(JobSource::LinkedIn, Behaviour::Fail),
            Scripted::new(JobSource::Glassdoor, Behaviour::Records(vec![record("b1", "g/1")])),
        ]);

        let gathered = coordinator.gather(&criteria()).await;

        assert_eq!(gathered.records.len(), 1);
        assert_eq!(gathered.records[0].source, Some(JobSource::Glassdoor));
        assert!(matches!(gathered.reports[0].status, SourceStatus::Failed { .. }));
        assert_eq!(gathered.reports[1].status, SourceStatus::Completed { records: 1 });
    }

    #[tokio::test]
    async fn test_panicking_source_is_reported_as_failed() {
        let coordinator = SourceCoordinator::new(vec![
            Scripted::new(JobSource::LinkedIn, Behaviour::Records(vec![record("a1", "l/1")])),
            Scripted::new(JobSource::Glassdoor, Behaviour::Panic),
        ]);

        let gathered = coordinator.gather(&criteria()).await;

        assert_eq!(gathered.records.len(), 1);
        assert!(matches!(gathered.reports[1].status, SourceStatus::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_off_slow_source() {
        let coordinator = SourceCoordinator::new(vec![
            Scripted::new(JobSource::LinkedIn, Behaviour::Hang),
            Scripted::new(JobSource::Glassdoor, Behaviour::Records(vec![record("b1", "g/1")])),
        ])
        .with_deadline(Some(Duration::from_secs(600)));

        let gathered = coordinator.gather(&criteria()).await;

        assert_eq!(gathered.reports[0].status, SourceStatus::TimedOut { after_secs: 600 });
        assert_eq!(gathered.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_run_concurrently() {
        let slow = |source, title: &str| -> Arc<dyn SourceExtractor> {
            Arc::new(Scripted {
                source,
                behaviour: Behaviour::Records(vec![record(title, title)]),
                delay: Duration::from_secs(10),
            })
        };
        let coordinator = SourceCoordinator::new(vec![
            slow(JobSource::LinkedIn, "a1"),
            slow(JobSource::Glassdoor, "b1"),
        ]);

        let started = Instant::now();
        let gathered = coordinator.gather(&criteria()).await;
        let took = started.elapsed();

        assert_eq!(gathered.records.len(), 2);
        assert!(took >= Duration::from_secs(10));
        assert!(took < Duration::from_secs(11), "sources ran one after another: {took:?}");
    }

    #[tokio::test]
    async fn test_apply_link_dedup_keeps_first() {
        let coordinator = SourceCoordinator::new(vec![
            Scripted::new(JobSource::LinkedIn, Behaviour::Records(vec![record("a1", "same")])),
            Scripted::new(
                JobSource::Glassdoor,
                Behaviour::Records(vec![record("b1", "same"), record("b2", "other")]),
            ),
        ])
        .with_dedup(DedupPolicy::ApplyLink);

        let gathered = coordinator.gather(&criteria()).await;

        let titles: Vec<_> = gathered.records.iter().map(|r| r.job_title.as_str()).collect();
        assert_eq!(titles, vec!["a1", "b2"]);
        // reports still count what each source produced
        assert_eq!(gathered.reports[1].status, SourceStatus::Completed { records: 2 });
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = SourceReport {
            source: JobSource::Glassdoor,
            status: SourceStatus::Failed {
                error: "listing container did not appear within 30s".into(),
            },
            elapsed_ms: 31000,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["source"], "Glassdoor");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "listing container did not appear within 30s");
    }
}
