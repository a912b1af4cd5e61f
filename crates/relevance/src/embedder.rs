use anyhow::Result;
use async_trait::async_trait;

/// Text to fixed-length vector. Implementations hold no per-request
/// state, so one instance is shared by every concurrent scoring call.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Backend label for logs and health output.
    fn name(&self) -> &str;

    /// Reachability probe used by the health endpoint.
    async fn ping(&self) -> Result<()> {
        let vector = self.embed("ping").await?;
        anyhow::ensure!(!vector.is_empty(), "{} returned an empty embedding", self.name());
        Ok(())
    }
}
