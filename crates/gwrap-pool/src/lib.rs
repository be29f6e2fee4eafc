mod pool;

pub use pool::{Credential, KeyPool, KeyPoolError, MODEL_PREFERENCE};
