pub mod rl;

use crate::topology::Instance;

/// Algorithm that embeds virtual network requests onto a substrate.
pub trait EmbeddingAlgorithm {
    /// The embedding produced for one instance.
    type Output;
    /// Failure that prevents the algorithm from producing an embedding.
    type Error;

    /// Embeds a single instance.
    ///
    /// A rejected request is a valid output, not an error.
    fn embed(&mut self, instance: &Instance) -> Result<Self::Output, Self::Error>;

    /// Short name used in logs and reports.
    fn name(&self) -> &str;
}
