//! Query result caching

mod fingerprint;
mod stage;
mod store;

pub use fingerprint::{FingerprintMode, QueryFingerprint};
pub use stage::Cached;
pub use store::{CacheStats, ResultCache};
