//! Storage layer abstraction trait definition

mod cache_store;
mod clock;
mod token_store;

pub use cache_store::{CacheStore, InMemoryCacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use token_store::{InMemoryTokenStore, TokenStore};
