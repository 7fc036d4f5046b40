//! Streaming sources for anime episodes
//!
//! Provider adapters for the primary catalog and the supplementary
//! scrapers, the aggregator that merges them, and the skip-times client.

pub mod aggregate;
pub mod provider;
pub mod providers;
pub mod relay;
pub mod skip;

pub use aggregate::{ProviderGroupFlags, SourceAggregator, StreamingData};
pub use provider::{
    EpisodeRequest, ProviderError, ProviderGroup, ProviderOutput, SourceProvider, StreamingSource,
    Subtitle,
};
pub use skip::{SkipTime, SkipTimesClient, SkipType};
