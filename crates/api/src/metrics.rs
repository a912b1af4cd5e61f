use dashmap::DashMap;
use search::{SearchResponse, SourceStatus};
use serde::Serialize;
use sources::JobSource;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
struct SourceCounters {
    runs: usize,
    failures: usize,
    timeouts: usize,
    records: usize,
}

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_search_time_us: AtomicU64,

    // Counts
    total_jobs_returned: AtomicUsize,
    per_source: DashMap<JobSource, SourceCounters>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_search_time_us: AtomicU64::new(0),
            total_jobs_returned: AtomicUsize::new(0),
            per_source: DashMap::new(),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_search(&self, duration: Duration, response: &SearchResponse) {
        self.total_search_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_jobs_returned
            .fetch_add(response.job_count(), Ordering::Relaxed);

        for report in response.sources() {
            let mut counters = self.per_source.entry(report.source).or_default();
            counters.runs += 1;
            match report.status {
                SourceStatus::Completed { records } => counters.records += records,
                SourceStatus::Failed { .. } => counters.failures += 1,
                SourceStatus::TimedOut { .. } => counters.timeouts += 1,
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let searches = self.successful_requests.load(Ordering::Relaxed);
        let sources = self
            .per_source
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().to_string(),
                    SourceSnapshot {
                        runs: c.runs,
                        failures: c.failures,
                        timeouts: c.timeouts,
                        records: c.records,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: searches,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_search_time_ms: avg_ms(self.total_search_time_us.load(Ordering::Relaxed), searches),
            total_jobs_returned: self.total_jobs_returned.load(Ordering::Relaxed),
            sources,
        }
    }
}

fn avg_ms(total_us: u64, count: usize) -> f64 {
    if count > 0 {
        total_us as f64 / count as f64 / 1000.0
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_search_time_ms: f64,
    pub total_jobs_returned: usize,
    pub sources: BTreeMap<String, SourceSnapshot>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub runs: usize,
    pub failures: usize,
    pub timeouts: usize,
    pub records: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
