//! Tally REST API
//!
//! This crate provides the axum-based HTTP surface: the statistics
//! endpoint with its hook set, the API host builder, and the JSON
//! response envelope.

pub mod context;
pub mod error;
pub mod health;
pub mod host;
pub mod response;
pub mod stats;

pub use context::RequestContext;
pub use error::ApiError;
pub use host::{ApiHost, Authorizer};
pub use response::{ApiErrorEntry, ApiResponse};
pub use stats::{EndpointHooks, ProviderDetector, ProviderRegistry, StatisticsEndpoint};
