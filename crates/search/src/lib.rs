pub mod coordinator;
pub mod pipeline;

pub use coordinator::{DedupPolicy, Gathered, SourceCoordinator, SourceReport, SourceStatus};
pub use pipeline::{JobSearchPipeline, PipelineError, ResponseMode, SearchResponse};
