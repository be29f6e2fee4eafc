pub mod cost;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod upstream;

pub use cost::{Cost, CostModel, ModelCost};
pub use error::ProxyError;
pub use pipeline::{CacheStatus, ProxyEngine, ProxyReply};
pub use upstream::{GeminiClient, UpstreamCall, UpstreamTransport, WreqTransport};
