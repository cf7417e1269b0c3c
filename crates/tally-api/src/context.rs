//! Request-scoped context

use axum::http::{HeaderMap, Method, Uri};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-request state handed to every endpoint hook.
///
/// The `values` bag is free-form mutable state hooks can use to pass
/// data to later hooks in the chain (an authorizer stashing the
/// caller's identity for the after-request hook, for instance).
#[derive(Debug)]
pub struct RequestContext {
    /// Unique id for this request, also attached to log lines.
    pub request_id: Uuid,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Free-form state shared between hooks.
    pub values: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            uri,
            headers,
            values: HashMap::new(),
        }
    }

    /// A request header as UTF-8 text, if present and decodable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}
