pub mod enricher;
pub mod fetcher;
pub mod upstream_caller;

pub use enricher::Enricher;
pub use fetcher::{CachedMedia, MediaFetcher, MediaKind, NullMediaFetcher};
pub use upstream_caller::UpstreamCaller;
