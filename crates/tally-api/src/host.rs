//! API host builder
//!
//! Assembles the outer router: API routes nested under `/api`, an
//! optional host-wide authorizer, the `X-Powered-By` header and HTTP
//! tracing.

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header::HeaderName},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::context::RequestContext;
use crate::health;

const POWERED_BY_HEADER: &str = "x-powered-by";
const DEFAULT_POWERED_BY: &str = "tally";

/// Host-wide request gate. A `false` result short-circuits the
/// request with a 401 and an empty body.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, ctx: &RequestContext) -> bool;
}

/// Builder for the outer HTTP application.
pub struct ApiHost {
    powered_by: Option<String>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl Default for ApiHost {
    fn default() -> Self {
        Self {
            powered_by: Some(DEFAULT_POWERED_BY.to_string()),
            authorizer: None,
        }
    }
}

impl ApiHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the `X-Powered-By` value. Empty disables the header.
    pub fn powered_by(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        self.powered_by = (!value.trim().is_empty()).then_some(value);
        self
    }

    /// Gate every request through an authorizer.
    pub fn authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    /// Assemble the application router: `api` nested under `/api`,
    /// plus the health routes at the root.
    pub fn build(self, api: Router) -> Router {
        let mut router = Router::new().nest("/api", api).merge(health::routes());

        if let Some(authorizer) = self.authorizer {
            router = router.layer(middleware::from_fn_with_state(authorizer, authorize));
        }

        if let Some(value) = self
            .powered_by
            .and_then(|name| HeaderValue::from_str(&name).ok())
        {
            router = router.layer(middleware::from_fn_with_state(value, powered_by_header));
        }

        router.layer(TraceLayer::new_for_http())
    }
}

async fn authorize(
    State(authorizer): State<Arc<dyn Authorizer>>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::new(
        request.method().clone(),
        request.uri().clone(),
        request.headers().clone(),
    );

    if !authorizer.authorize(&ctx).await {
        debug!(request_id = %ctx.request_id, uri = %ctx.uri, "request not authorized");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    next.run(request).await
}

async fn powered_by_header(
    State(value): State<HeaderValue>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(HeaderName::from_static(POWERED_BY_HEADER), value);
    response
}
