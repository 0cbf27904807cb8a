//! Rate-limited, signed, retried fetching against platform APIs.

mod client;
mod limiter;
mod signer;

pub use client::{ApiCodes, FetchClient, FetchConfig, FetchError};
pub use limiter::{LimiterClosed, Permit, RateLimiter, RateLimiterConfig};
pub use signer::{SignError, Signer, TimestampSigner};
