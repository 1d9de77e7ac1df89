use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Method, Uri};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// GET /
///
/// Echo of the request, mostly useful as a liveness check.
pub async fn echo(
    method: Method,
    uri: Uri,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> axum::response::Response {
    Json(json!({
        "HttpMethod": method.as_str(),
        "RemoteAddr": remote.to_string(),
        "Path": uri.path(),
    }))
    .into_response()
}
