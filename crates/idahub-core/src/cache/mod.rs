//! Response cache for oversized tool output, retrievable in slices.

mod clock;
mod response_cache;

pub use clock::{Clock, ManualClock, SystemClock};
pub use response_cache::{CacheChunk, ResponseCache, ResponseCacheStats};
