// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod notify;
pub mod publish;
pub mod releases;
pub mod retry;
pub mod reviews;
pub mod search;
pub mod subscription;
pub mod upstream;

pub use crate::aggregate::{Aggregated, Page, PageSource, PaginatedAggregator};
pub use crate::api::{create_router, AppState};
pub use crate::cache::{CacheEntry, CacheStore, MemoryStore, SingleFlightCache};
pub use crate::config::{AppConfig, ConfigError, PartialFailurePolicy};
pub use crate::retry::{
    CallOutcome, FailureKind, FinalFailure, RetryExecutor, RetryPolicy, UpstreamFailure,
};
