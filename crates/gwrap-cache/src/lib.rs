mod fast;
mod tier;

pub use fast::FastCache;
pub use tier::CacheTier;
