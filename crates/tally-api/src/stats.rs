//! Statistics endpoint
//!
//! Binds `GET /stats/{name}` and bridges the request to a
//! [`StatisticProvider`] resolved by name. Authorization, request
//! lifecycle and response shaping are all injectable through
//! [`EndpointHooks`]; the defaults implement the plain contract:
//! 200 with a JSON envelope, 401 on rejected authorization, 404 for
//! unknown names, 500 for anything that fails in between.

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use tally_core::{
    StatisticOptions, StatisticParameters, StatisticProvider, StatisticResult, StatisticSource,
    strings,
};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::response::ApiResponse;

/// Resolves a statistic provider from a normalized name.
#[async_trait]
pub trait ProviderDetector: Send + Sync {
    /// Resolve `name` (already trimmed and lowercased) to a provider,
    /// or `None` when the name is unknown.
    async fn detect(&self, name: &str, ctx: &RequestContext) -> Option<StatisticProvider>;
}

/// A name-keyed set of statistic sources, usable as a detector.
#[derive(Default)]
pub struct ProviderRegistry {
    sources: HashMap<String, Arc<dyn StatisticSource>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under a name. Names collide through the same
    /// normalization the endpoint applies to the path segment.
    pub fn register(&mut self, name: impl AsRef<str>, source: Arc<dyn StatisticSource>) {
        let name = strings::normalize(name.as_ref());
        if !name.is_empty() {
            self.sources.insert(name, source);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl ProviderDetector for ProviderRegistry {
    async fn detect(&self, name: &str, _ctx: &RequestContext) -> Option<StatisticProvider> {
        self.sources
            .get(name)
            .cloned()
            .map(StatisticProvider::from_arc)
    }
}

/// Lifecycle hooks around a statistics request.
///
/// Every method has a no-op default, so implementations override only
/// what they need. `after_request` runs exactly once per request, on
/// success, rejection and failure paths alike, and is the only place
/// the underlying error of a 500 response is visible.
#[async_trait]
pub trait EndpointHooks: Send + Sync {
    /// Gate the request. `false` produces a 401 with an empty body.
    async fn authorize(&self, _ctx: &mut RequestContext) -> bool {
        true
    }

    /// Runs after authorization, before the provider is resolved.
    async fn before_request(&self, _ctx: &mut RequestContext) -> Result<(), ApiError> {
        Ok(())
    }

    /// Runs last, with the error that caused a 500 (if any).
    async fn after_request(&self, _ctx: &mut RequestContext, _error: Option<&ApiError>) {}

    /// Produce a custom response for a loaded result. `None` selects
    /// the default JSON envelope.
    async fn handle_response(
        &self,
        _result: &StatisticResult,
        _ctx: &mut RequestContext,
    ) -> Result<Option<Response>, ApiError> {
        Ok(None)
    }
}

/// The no-op hook set used when none is configured.
struct DefaultHooks;

#[async_trait]
impl EndpointHooks for DefaultHooks {}

/// The `/stats/{name}` endpoint.
pub struct StatisticsEndpoint {
    detector: Arc<dyn ProviderDetector>,
    hooks: Arc<dyn EndpointHooks>,
}

impl StatisticsEndpoint {
    pub fn new(detector: impl ProviderDetector + 'static) -> Self {
        Self {
            detector: Arc::new(detector),
            hooks: Arc::new(DefaultHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: impl EndpointHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Create the endpoint routes.
    pub fn routes(self) -> Router {
        Router::new()
            .route("/stats/{name}", get(load_statistic))
            .with_state(Arc::new(self))
    }

    /// Steps 3-8 of the request protocol. 404s are regular responses;
    /// `Err` is reserved for failures that surface as 500.
    async fn run(
        &self,
        name: &str,
        query: HashMap<String, String>,
        ctx: &mut RequestContext,
    ) -> Result<Response, ApiError> {
        self.hooks.before_request(ctx).await?;

        let options = StatisticOptions {
            offset: parse_query_int(query.get("o")),
            limit: parse_query_int(query.get("l")),
            parameters: to_parameters(&query),
        };

        let name = strings::normalize(name);
        if name.is_empty() {
            return Ok(StatusCode::NOT_FOUND.into_response());
        }

        let Some(provider) = self.detector.detect(&name, ctx).await else {
            debug!(name = %name, "no statistic provider for name");
            return Ok(StatusCode::NOT_FOUND.into_response());
        };

        let result = provider.load(options).await?;

        if let Some(response) = self.hooks.handle_response(&result, ctx).await? {
            return Ok(response);
        }

        Ok((StatusCode::OK, Json(ApiResponse::success(result))).into_response())
    }
}

async fn load_statistic(
    State(endpoint): State<Arc<StatisticsEndpoint>>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    metrics::counter!("tally_statistics_requests_total").increment(1);

    let mut ctx = RequestContext::new(method, uri, headers);

    if !endpoint.hooks.authorize(&mut ctx).await {
        debug!(request_id = %ctx.request_id, "statistics request rejected");
        endpoint.hooks.after_request(&mut ctx, None).await;
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match endpoint.run(&name, query, &mut ctx).await {
        Ok(response) => {
            endpoint.hooks.after_request(&mut ctx, None).await;
            response
        }
        Err(err) => {
            error!(request_id = %ctx.request_id, error = %err, "statistics request failed");
            endpoint.hooks.after_request(&mut ctx, Some(&err)).await;
            err.into_response()
        }
    }
}

/// Parse a query value as an integer; unparsable values count as
/// absent so the engine's defaulting applies.
fn parse_query_int(raw: Option<&String>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse().ok())
}

/// Collect provider parameters from the query string: every pair
/// except the paging controls `o` and `l`, keys normalized.
fn to_parameters(query: &HashMap<String, String>) -> StatisticParameters {
    query
        .iter()
        .filter_map(|(key, value)| {
            let key = strings::normalize(key);
            if key.is_empty() || key == "o" || key == "l" {
                return None;
            }
            Some((key, serde_json::Value::String(value.clone())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_query_ints() {
        assert_eq!(parse_query_int(Some(&" 42 ".to_string())), Some(42));
        assert_eq!(parse_query_int(Some(&"-3".to_string())), Some(-3));
        assert_eq!(parse_query_int(Some(&"abc".to_string())), None);
        assert_eq!(parse_query_int(Some(&"".to_string())), None);
        assert_eq!(parse_query_int(None), None);
    }

    #[test]
    fn parameters_exclude_paging_controls() {
        let mut query = HashMap::new();
        query.insert("o".to_string(), "10".to_string());
        query.insert("l".to_string(), "5".to_string());
        query.insert(" Region ".to_string(), "emea".to_string());
        query.insert("YEAR".to_string(), "2024".to_string());

        let parameters = to_parameters(&query);

        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters["region"], json!("emea"));
        assert_eq!(parameters["year"], json!("2024"));
    }

    #[test]
    fn registry_normalizes_names() {
        struct Empty;

        #[async_trait]
        impl StatisticSource for Empty {
            async fn fetch(
                &self,
                _options: &tally_core::LoadOptions,
            ) -> Result<tally_core::StatisticPage, tally_core::CoreError> {
                Ok(tally_core::StatisticPage::default())
            }
        }

        let mut registry = ProviderRegistry::new();
        registry.register(" Sales ", Arc::new(Empty));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["sales"]);
    }
}
