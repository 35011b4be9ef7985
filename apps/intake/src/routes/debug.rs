use std::collections::BTreeMap;

use axum::{
    extract::{OriginalUri, Query},
    http::{header, HeaderMap, HeaderName, Method},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

const REDACTED: &str = "[redacted]";

/// Headers whose values are never reflected.
fn is_credential(name: &HeaderName) -> bool {
    name == header::AUTHORIZATION
        || name == header::PROXY_AUTHORIZATION
        || name == header::COOKIE
        || name == header::SET_COOKIE
        || name.as_str() == "x-api-key"
}

/// GET /test
pub async fn handle_test(
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Json<Value> {
    let names: Vec<&str> = headers.keys().map(|name| name.as_str()).collect();
    Json(json!({
        "success": true,
        "message": "API is working",
        "request": {
            "method": method.as_str(),
            "url": uri.to_string(),
            "headers": names,
        }
    }))
}

/// GET|POST /echo
/// Reflects the request line, headers and query string back to the caller.
/// Credential header values are replaced with a marker.
pub async fn handle_echo(
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<BTreeMap<String, String>>,
) -> Json<Value> {
    debug!("Echo {method} {uri}");
    let headers: BTreeMap<&str, &str> = headers
        .iter()
        .filter_map(|(name, value)| {
            let value = if is_credential(name) {
                REDACTED
            } else {
                value.to_str().ok()?
            };
            Some((name.as_str(), value))
        })
        .collect();
    Json(json!({
        "success": true,
        "message": "Echo endpoint responding",
        "timestamp": Utc::now().to_rfc3339(),
        "request": {
            "method": method.as_str(),
            "url": uri.to_string(),
            "headers": headers,
            "query": query,
        }
    }))
}
