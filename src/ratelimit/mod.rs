//! Rate limiting logic and state management.

mod backend;
mod identity;
mod limiter;
mod limits;
mod memory;
mod redis_store;

pub use backend::{CountingStore, BLACKLIST_MARKER, COUNTER_WINDOW};
pub use identity::{blacklist_key, requests_key, Credentials, API_KEY_HEADER};
pub use limiter::{RateLimiter, Verdict, INTERNAL_ERROR_MSG, INVALID_KEY_MSG, RATE_LIMITED_MSG};
pub use limits::{ApiKeyEntry, ApiKeyTable, LimitSource};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
