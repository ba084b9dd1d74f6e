//! Classroom GitHub - GitHub REST client for repository provisioning
//!
//! Implements [`classroom_core::VersionControl`] against the GitHub REST API.
//! Every response feeds a shared rate-limit budget; once the budget runs low
//! calls fail fast with a retryable error instead of hitting the limit.

mod client;
mod error;
mod models;
mod rate_limit;

pub use client::GitHubClient;
pub use error::{Error, Result};
pub use rate_limit::RateLimitState;
