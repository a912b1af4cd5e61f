use serde::{Deserialize, Serialize};
use std::fmt;

/// Search input for one request. Every field is free text and doubles as
/// the fallback value for fields a page does not yield.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub position: String,
    pub experience: String,
    pub salary: String,
    #[serde(rename = "jobNature")]
    pub job_nature: String,
    pub location: String,
    pub skills: String,
}

/// Which site produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobSource {
    LinkedIn,
    Glassdoor,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::LinkedIn => "LinkedIn",
            JobSource::Glassdoor => "Glassdoor",
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered posting. No field is ever absent: extraction substitutes
/// a fallback instead of omitting a value. `source` is attached once, by
/// the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_title: String,
    pub company: String,
    pub experience: String,
    pub description: String,
    #[serde(rename = "jobNature")]
    pub job_nature: String,
    pub location: String,
    pub salary: String,
    pub apply_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<JobSource>,
}

/// Response-facing projection used by the relevance-filtered variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_title: String,
    pub company: String,
    pub experience: String,
    #[serde(rename = "jobNature")]
    pub job_nature: String,
    pub location: String,
    pub salary: String,
    pub apply_link: String,
}

impl JobRecord {
    pub fn tagged(mut self, source: JobSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_title: self.job_title.clone(),
            company: self.company.clone(),
            experience: self.experience.clone(),
            job_nature: self.job_nature.clone(),
            location: self.location.clone(),
            salary: self.salary.clone(),
            apply_link: self.apply_link.clone(),
        }
    }
}
