use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use botlnek_core::DomainKey;
use botlnek_store::SourceRegistry;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// GET /domains
///
/// Placeholder listing; domain enumeration is not part of the engine
/// contract, so this always answers with an empty set.
pub async fn list_domains() -> axum::response::Response {
    Json(json!([])).into_response()
}

/// POST /domains
///
/// 201 on creation, 202 when the key already exists (first write wins).
pub async fn append_domain(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::DomainRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::body_rejection_to_response(rejection),
    };

    match services.registry.append_new_domain(body.into()).await {
        Ok(Some(domain)) => (StatusCode::CREATED, Json(domain)).into_response(),
        Ok(None) => (StatusCode::ACCEPTED, Json(json!({"Redundant": true}))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /domains/:key
pub async fn get_domain(
    Extension(services): Extension<Arc<AppServices>>,
    Path(key): Path<String>,
) -> axum::response::Response {
    match services.registry.get_domain(&DomainKey::from(key)).await {
        Ok(Some(domain)) => (StatusCode::OK, Json(domain)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "no such domain"),
        Err(e) => errors::store_error_to_response(e),
    }
}
