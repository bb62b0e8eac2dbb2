//! HTTP adapter.
//!
//! Exposes every registry operation as a JSON route. A single generic
//! handler serves all routes; the route's [`OperationSpec`] decides the
//! method, the remote operation and the parameter defaults.

use crate::envelope::OperationRequest;
use crate::error::{GatewayError, Result};
use crate::normalizer::{normalize_response, shape_list, Node};
use crate::pipeline::OperationBackend;
use crate::registry::{OperationRegistry, OperationSpec};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, RawQuery};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Path of the liveness route.
pub const HEALTH_PATH: &str = "/health";

/// Inbound header carrying the caller's correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Liveness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub routes: usize,
    pub requests_processed: u64,
    pub requests_failed: u64,
}

/// Shared adapter state.
pub struct Gateway {
    backend: Arc<dyn OperationBackend>,
    registry: OperationRegistry,
    requests_processed: AtomicU64,
    requests_failed: AtomicU64,
    next_id: AtomicU64,
}

impl Gateway {
    pub fn new(backend: Arc<dyn OperationBackend>, registry: OperationRegistry) -> Self {
        Self {
            backend,
            registry,
            requests_processed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            routes: self.registry.len(),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }

    fn correlation_id(&self, headers: &HeaderMap) -> String {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    /// Serve one request for `spec`.
    pub async fn handle(
        &self,
        spec: &OperationSpec,
        method: Method,
        headers: HeaderMap,
        query: Option<String>,
        body: std::result::Result<Bytes, BytesRejection>,
    ) -> Response {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        let correlation_id = self.correlation_id(&headers);
        let started = Instant::now();

        debug!(
            correlation_id = %correlation_id,
            route = %spec.path,
            method = %method,
            "Received request"
        );

        match self.process(spec, &method, query.as_deref(), body, &correlation_id).await {
            Ok(node) => {
                info!(
                    correlation_id = %correlation_id,
                    route = %spec.path,
                    operation = %spec.operation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request completed"
                );
                Json(node).into_response()
            }
            Err(err) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %correlation_id,
                    route = %spec.path,
                    operation = %spec.operation,
                    kind = err.kind().as_str(),
                    client_error = err.kind().is_client_error(),
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request failed"
                );
                err.into_response()
            }
        }
    }

    async fn process(
        &self,
        spec: &OperationSpec,
        method: &Method,
        query: Option<&str>,
        body: std::result::Result<Bytes, BytesRejection>,
        correlation_id: &str,
    ) -> Result<Node> {
        if !spec.method.matches(method) {
            return Err(GatewayError::MethodNotAllowed {
                method: method.to_string(),
                allowed: spec.method.as_str().to_string(),
            });
        }

        let body = body.map_err(|e| GatewayError::Decoding(e.body_text()))?;
        let query = if *method == Method::GET { query } else { None };
        let input = decode_input(query, &body)?;
        let params = build_params(spec, input);

        debug!(
            correlation_id = %correlation_id,
            operation = %spec.operation,
            endpoint = %spec.endpoint,
            params = params.len(),
            "Dispatching operation"
        );

        let request = OperationRequest {
            operation: spec.operation.clone(),
            params,
        };
        let raw = self.backend.execute(spec.endpoint, request.clone()).await?;
        let node = normalize_response(raw.body.as_ref(), &raw.hints);

        Ok(match &spec.shaping {
            Some(shaping) => shape_list(node, shaping, &request.params),
            None => node,
        })
    }
}

/// Merge query-string pairs and the JSON body into one parameter source.
///
/// Body keys win over query keys. An empty body contributes nothing.
fn decode_input(query: Option<&str>, body: &[u8]) -> Result<Map<String, Value>> {
    let mut input = Map::new();

    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            input.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(input);
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => {
            input.extend(fields);
            Ok(input)
        }
        Ok(other) => Err(GatewayError::Decoding(format!(
            "request body must be a JSON object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(GatewayError::Decoding(format!("invalid JSON body: {}", e))),
    }
}

/// Order parameters by the route's schema, filling defaults; extra keys follow
/// in request order.
fn build_params(spec: &OperationSpec, input: Map<String, Value>) -> Map<String, Value> {
    let mut params = Map::new();

    for param in &spec.params {
        if let Some(value) = input.get(&param.name).or(param.default.as_ref()) {
            params.insert(param.name.clone(), value.clone());
        }
    }
    for (key, value) in input {
        if !params.contains_key(&key) {
            params.insert(key, value);
        }
    }

    params
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Build the router: one route per registry entry plus [`HEALTH_PATH`].
pub fn router(gateway: Arc<Gateway>, max_body_size: usize) -> Router {
    let health = Arc::clone(&gateway);
    let mut app = Router::new().route(
        HEALTH_PATH,
        get(move || {
            let gateway = Arc::clone(&health);
            async move { Json(gateway.health()) }
        }),
    );

    for spec in gateway.registry().iter() {
        if spec.path == HEALTH_PATH {
            warn!(operation = %spec.operation, "Route shadows the health check, skipping");
            continue;
        }

        debug!(
            route = %spec.path,
            operation = %spec.operation,
            method = %spec.method,
            "Mounting route"
        );

        let path = spec.path.clone();
        let gateway = Arc::clone(&gateway);
        let spec = Arc::clone(spec);
        app = app.route(
            &path,
            any(
                move |method: Method,
                      headers: HeaderMap,
                      RawQuery(query): RawQuery,
                      body: std::result::Result<Bytes, BytesRejection>| {
                    let gateway = Arc::clone(&gateway);
                    let spec = Arc::clone(&spec);
                    async move { gateway.handle(&spec, method, headers, query, body).await }
                },
            ),
        );
    }

    app.layer(DefaultBodyLimit::max(max_body_size))
}
