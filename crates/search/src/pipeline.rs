use relevance::RelevanceScorer;
use serde::{Deserialize, Serialize};
use sources::{JobRecord, JobSummary, SearchCriteria};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::coordinator::{SourceCoordinator, SourceReport};

/// Which response shape a search returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Every merged posting with its source tag.
    #[default]
    All,
    /// Only postings the relevance scorer accepts, without descriptions.
    Relevant,
}

impl FromStr for ResponseMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ResponseMode::All),
            "relevant" => Ok(ResponseMode::Relevant),
            other => Err(PipelineError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("relevance filtering requested but no scorer is configured")]
    ScorerUnavailable,

    #[error("unknown response mode '{0}', expected 'all' or 'relevant'")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SearchResponse {
    All {
        total_results: usize,
        jobs: Vec<JobRecord>,
        sources: Vec<SourceReport>,
    },
    Relevant {
        relevant_jobs: Vec<JobSummary>,
        sources: Vec<SourceReport>,
    },
}

impl SearchResponse {
    pub fn job_count(&self) -> usize {
        match self {
            SearchResponse::All { jobs, .. } => jobs.len(),
            SearchResponse::Relevant { relevant_jobs, .. } => relevant_jobs.len(),
        }
    }

    pub fn sources(&self) -> &[SourceReport] {
        match self {
            SearchResponse::All { sources, .. } | SearchResponse::Relevant { sources, .. } => {
                sources
            }
        }
    }
}

/// criteria -> every source (concurrently) -> merge -> optional relevance filter.
pub struct JobSearchPipeline {
    coordinator: SourceCoordinator,
    scorer: Option<RelevanceScorer>,
    default_mode: ResponseMode,
}

impl JobSearchPipeline {
    pub fn new(coordinator: SourceCoordinator) -> Self {
        Self {
            coordinator,
            scorer: None,
            default_mode: ResponseMode::All,
        }
    }

    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_default_mode(mut self, mode: ResponseMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn default_mode(&self) -> ResponseMode {
        self.default_mode
    }

    pub fn scorer(&self) -> Option<&RelevanceScorer> {
        self.scorer.as_ref()
    }

    pub fn coordinator(&self) -> &SourceCoordinator {
        &self.coordinator
    }

    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        mode: Option<ResponseMode>,
    ) -> Result<SearchResponse, PipelineError> {
        let mode = mode.unwrap_or(self.default_mode);

        // fail before scraping if the requested mode cannot be served
        let scorer = match (mode, &self.scorer) {
            (ResponseMode::Relevant, None) => return Err(PipelineError::ScorerUnavailable),
            (ResponseMode::Relevant, Some(scorer)) => Some(scorer),
            (ResponseMode::All, _) => None,
        };

        let gathered = self.coordinator.gather(criteria).await;
        let merged = gathered.records.len();

        let response = match scorer {
            None => SearchResponse::All {
                total_results: merged,
                jobs: gathered.records,
                sources: gathered.reports,
            },
            Some(scorer) => {
                let kept = scorer.filter(gathered.records, criteria).await;
                SearchResponse::Relevant {
                    relevant_jobs: kept.iter().map(JobRecord::summary).collect(),
                    sources: gathered.reports,
                }
            }
        };

        info!(
            position = %criteria.position,
            location = %criteria.location,
            mode = ?mode,
            merged,
            returned = response.job_count(),
            "Search complete"
        );

        Ok(response)
    }
}
