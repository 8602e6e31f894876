//! lobbyroute - resilient gateway in front of rate-limited LLM providers
//!
//! Each request is classified, answered from a state-aware cache when
//! possible, and otherwise sent down an ordered cascade of provider tiers.
//! Provider health is tracked from rate-limit metadata so degraded
//! providers are skipped before they reject.

pub mod audit;
pub mod cache;
pub mod classifier;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod persona;
pub mod providers;
pub mod telemetry;
