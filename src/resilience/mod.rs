//! # Resilience Module
//!
//! Reusable failure-handling patterns for the automation engine.
//!
//! ## Components
//! - `RetryPolicy`: exponential backoff with jitter and bounded attempts.
//! - `retry_async`: drives a fallible async operation under a policy.

pub mod retry;

pub use retry::{retry_async, RetryPolicy};
