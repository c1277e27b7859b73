//! cobalt-http — Helselia REST client.
#![deny(unsafe_code)]
//!
//! A thin request pipeline over per-route sequential buckets: requests on
//! one canonical route run serially, allowance headers drive the next
//! dispatch, and a process-wide global lockout is honored by every route.
//! The core exposes the gateway probe (`/gateway/bot`) the shard manager
//! consumes; resource endpoints live outside this crate.

mod client;
pub mod error;
mod ratelimit;
mod routes;

pub use client::HttpClient;
pub use error::HttpError;
pub use ratelimit::{BucketPermit, RateLimiter, SequentialBucket};
pub use routes::{
    canonical_route, CurrentUser, GatewayBotResponse, GatewayResponse, SessionStartLimit,
};
