pub mod extractor;
pub mod fields;
pub mod glassdoor;
pub mod linkedin;
pub mod location;
pub mod normalizer;
pub mod retry;
pub mod schema;

pub use extractor::{ItemSkip, ScrapeError, SiteTimeouts, SourceExtractor, Stage};
pub use glassdoor::GlassdoorExtractor;
pub use linkedin::LinkedInExtractor;
pub use location::{GlassdoorLocations, LocationResolver, LookupError, DEFAULT_LOCATION_ID};
pub use normalizer::TextNormalizer;
pub use retry::{RetryPolicy, Retryable};
pub use schema::{JobRecord, JobSource, JobSummary, SearchCriteria};
