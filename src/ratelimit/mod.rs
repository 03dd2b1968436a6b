//! Rate limiting logic and counter storage.

mod decision;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod store;

pub use decision::Decision;
pub use limiter::{RateLimiter, WINDOW};
pub use memory::MemoryStore;
pub use policy::{LimitPolicy, RateKey};
pub use redis_store::RedisStore;
pub use store::CounterStore;
