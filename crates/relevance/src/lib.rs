pub mod embedder;
pub mod ollama;
pub mod openai;
pub mod scorer;
pub mod similarity;

pub use embedder::Embedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use scorer::{RelevanceDecision, RelevanceScorer, Verdict};
pub use similarity::cosine_similarity;
