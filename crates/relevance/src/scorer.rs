//! Accept/reject decisions for scraped postings against the searcher's
//! criteria.
//!
//! A posting is accepted when the searched position appears in its title
//! (case-insensitive), or when the embedding of `title. description` is
//! close enough to the embedding of `position requiring skills: skills`.
//! The lexical check runs first and needs no embedding call.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use sources::{JobRecord, SearchCriteria};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embedder::Embedder;
use crate::similarity::cosine_similarity;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
    /// Scoring failed; the posting is left out of the filtered results.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceDecision {
    /// `None` when no embedding comparison was made.
    pub similarity: Option<f32>,
    pub title_match: bool,
    pub verdict: Verdict,
}

impl RelevanceDecision {
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }

    fn lexical() -> Self {
        Self {
            similarity: None,
            title_match: true,
            verdict: Verdict::Accepted,
        }
    }

    fn without_score(verdict: Verdict) -> Self {
        Self {
            similarity: None,
            title_match: false,
            verdict,
        }
    }
}

pub fn query_text(criteria: &SearchCriteria) -> String {
    format!("{} requiring skills: {}", criteria.position, criteria.skills)
}

pub fn document_text(record: &JobRecord) -> String {
    format!("{}. {}", record.job_title, record.description)
}

/// Case-insensitive substring test. The position is used as given, so an
/// empty position matches every title.
pub fn title_matches(position: &str, title: &str) -> bool {
    title.to_lowercase().contains(&position.to_lowercase())
}

/// Scores postings with an injected embedding backend.
pub struct RelevanceScorer {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    concurrency: usize,
}

impl RelevanceScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            threshold: DEFAULT_THRESHOLD,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// One decision per record, in input order.
    pub async fn score(
        &self,
        records: &[JobRecord],
        criteria: &SearchCriteria,
    ) -> Vec<RelevanceDecision> {
        if records.is_empty() {
            return Vec::new();
        }

        let needs_query = records
            .iter()
            .any(|r| !title_matches(&criteria.position, &r.job_title));
        let query = if needs_query {
            match self.embedder.embed(&query_text(criteria)).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!(
                        backend = self.embedder.name(),
                        error = %e,
                        "Query embedding failed, only title matches will be kept"
                    );
                    None
                }
            }
        } else {
            None
        };

        // collected before streaming so the returned future stays Send
        let query = query.as_deref();
        let pending: Vec<_> = records
            .iter()
            .map(|record| self.decide(record, criteria, query))
            .collect();

        stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Records whose decision is [`Verdict::Accepted`], in input order.
    pub async fn filter(&self, records: Vec<JobRecord>, criteria: &SearchCriteria) -> Vec<JobRecord> {
        let total = records.len();
        let decisions = self.score(&records, criteria).await;

        let kept: Vec<JobRecord> = records
            .into_iter()
            .zip(decisions)
            .filter(|(_, decision)| decision.is_accepted())
            .map(|(record, _)| record)
            .collect();

        info!(
            total,
            accepted = kept.len(),
            threshold = self.threshold,
            "Relevance filtering complete"
        );
        kept
    }

    async fn decide(
        &self,
        record: &JobRecord,
        criteria: &SearchCriteria,
        query: Option<&[f32]>,
    ) -> RelevanceDecision {
        if title_matches(&criteria.position, &record.job_title) {
            debug!(title = %record.job_title, "Accepted on title match");
            return RelevanceDecision::lexical();
        }

        if record.description.trim().is_empty() {
            return RelevanceDecision::without_score(Verdict::Rejected);
        }

        let Some(query) = query else {
            return RelevanceDecision::without_score(Verdict::Dropped);
        };

        match self.embedder.embed(&document_text(record)).await {
            Ok(document) => {
                let similarity = cosine_similarity(query, &document);
                let verdict = if similarity > self.threshold {
                    Verdict::Accepted
                } else {
                    Verdict::Rejected
                };
                debug!(title = %record.job_title, similarity, ?verdict, "Scored posting");
                RelevanceDecision {
                    similarity: Some(similarity),
                    title_match: false,
                    verdict,
                }
            }
            Err(e) => {
                warn!(
                    title = %record.job_title,
                    backend = self.embedder.name(),
                    error = %e,
                    "Embedding failed, dropping posting"
                );
                RelevanceDecision::without_score(Verdict::Dropped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VOCAB: [&str; 4] = ["python", "sql", "engineer", "cook"];

    /// Bag-of-words over a tiny vocabulary; fails on texts containing
    /// `fail_on`.
    #[derive(Default)]
    struct BagOfWords {
        fail_on: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for BagOfWords {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = text.to_lowercase();
            if let Some(marker) = self.fail_on {
                if text.contains(marker) {
                    anyhow::bail!("backend unavailable");
                }
            }
            Ok(VOCAB
                .iter()
                .map(|word| text.matches(word).count() as f32)
                .collect())
        }

        fn name(&self) -> &str {
            "bag-of-words"
        }
    }

    fn criteria(position: &str) -> SearchCriteria {
        SearchCriteria {
            position: position.into(),
            experience: "2 years".into(),
            salary: "100k".into(),
            job_nature: "onsite".into(),
            location: "Lahore".into(),
            skills: "Python, SQL".into(),
        }
    }

    fn record(title: &str, description: &str) -> JobRecord {
        JobRecord {
            job_title: title.into(),
            company: "Acme".into(),
            experience: "2 years".into(),
            description: description.into(),
            job_nature: "onsite".into(),
            location: "Lahore".into(),
            salary: "100k".into(),
            apply_link: "https://example.com/1".into(),
            source: None,
        }
    }

    #[test]
    fn test_title_matching() {
        assert!(title_matches("software engineer", "Senior SOFTWARE Engineer II"));
        assert!(!title_matches("Software Engineer", "Backend Developer"));
        assert!(title_matches("", "Backend Developer"));
        // surrounding whitespace is part of the searched text
        assert!(!title_matches("Engineer ", "Senior Engineer"));
        assert!(title_matches("Engineer ", "Engineer II"));
        assert_eq!(
            query_text(&criteria("Software Engineer")),
            "Software Engineer requiring skills: Python, SQL"
        );
    }

    #[tokio::test]
    async fn test_title_match_skips_embedding() {
        let embedder = Arc::new(BagOfWords::default());
        let scorer = RelevanceScorer::new(embedder.clone());

        let decisions = scorer
            .score(&[record("Software Engineer II", "")], &criteria("Software Engineer"))
            .await;

        assert_eq!(decisions, vec![RelevanceDecision::lexical()]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_similarity_threshold_decides_the_rest() {
        let scorer = RelevanceScorer::new(Arc::new(BagOfWords::default()));
        let records = vec![
            record("Backend Developer", "Python and SQL services"),
            record("Line Cook", "Cook for a busy kitchen"),
            record("Data Person", "   "),
        ];

        let decisions = scorer.score(&records, &criteria("Software Engineer")).await;

        assert_eq!(decisions[0].verdict, Verdict::Accepted);
        assert!(decisions[0].similarity.unwrap() > 0.8);
        assert_eq!(decisions[1].verdict, Verdict::Rejected);
        assert_eq!(decisions[1].similarity, Some(0.0));
        assert_eq!(decisions[2].verdict, Verdict::Rejected);
        assert_eq!(decisions[2].similarity, None);
    }

    #[tokio::test]
    async fn test_embedding_failure_drops_only_that_record() {
        let embedder = Arc::new(BagOfWords {
            fail_on: Some("flaky"),
            ..Default::default()
        });
        let scorer = RelevanceScorer::new(embedder).with_concurrency(2);
        let records = vec![
            record("Flaky Listing", "Python SQL"),
            record("Backend Developer", "Python and SQL services"),
        ];

        let kept = scorer.filter(records, &criteria("Software Engineer")).await;

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].job_title, "Backend Developer");
    }

    #[tokio::test]
    async fn test_query_failure_keeps_title_matches() {
        let embedder = Arc::new(BagOfWords {
            fail_on: Some("requiring skills"),
            ..Default::default()
        });
        let scorer = RelevanceScorer::new(embedder);
        let records = vec![
            record("Backend Developer", "Python and SQL services"),
            record("Software Engineer II", "Python"),
        ];

        let decisions = scorer.score(&records, &criteria("Software Engineer")).await;

        assert_eq!(decisions[0].verdict, Verdict::Dropped);
        assert_eq!(decisions[1].verdict, Verdict::Accepted);
        assert!(decisions[1].title_match);
    }

    #[tokio::test]
    async fn test_empty_skills_do_not_break_scoring() {
        let scorer = RelevanceScorer::new(Arc::new(BagOfWords::default())).with_threshold(0.9);
        let mut criteria = criteria("Software Engineer");
        criteria.skills = String::new();

        let kept = scorer
            .filter(
                vec![record("Backend Developer", "SQL"), record("Software Engineer", "")],
                &criteria,
            )
            .await;

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].job_title, "Software Engineer");
    }

    #[tokio::test]
    async fn test_empty_position_accepts_every_title() {
        let embedder = Arc::new(BagOfWords::default());
        let scorer = RelevanceScorer::new(embedder.clone());

        let decisions = scorer
            .score(&[record("Backend Developer", "Cook")], &criteria(""))
            .await;

        assert_eq!(decisions, vec![RelevanceDecision::lexical()]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_trailing_space_in_position_is_not_trimmed() {
        let scorer = RelevanceScorer::new(Arc::new(BagOfWords::default()));

        let decisions = scorer
            .score(&[record("Senior Engineer", "Line cook")], &criteria("Engineer "))
            .await;

        assert!(!decisions[0].title_match);
        assert_eq!(decisions[0].verdict, Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_filter_runs_on_spawned_task() {
        let scorer = Arc::new(RelevanceScorer::new(Arc::new(BagOfWords::default())).with_concurrency(2));
        let records = vec![
            record("Backend Developer", "Python and SQL services"),
            record("Line Cook", "Cook for a busy kitchen"),
            record("Software Engineer II", ""),
        ];

        let handle = tokio::spawn({
            let scorer = Arc::clone(&scorer);
            async move { scorer.filter(records, &criteria("Software Engineer")).await }
        });
        let kept = handle.await.unwrap();

        let titles: Vec<_> = kept.iter().map(|r| r.job_title.as_str()).collect();
        assert_eq!(titles, vec!["Backend Developer", "Software Engineer II"]);
    }
}
