use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use botlnek_core::{AggregateKey, CollectionToken, DomainKey};
use botlnek_store::SourceRegistry;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// GET /aggregates/:domain/:aggregate
pub async fn get_aggregate(
    Extension(services): Extension<Arc<AppServices>>,
    Path((domain, aggregate)): Path<(String, String)>,
) -> axum::response::Response {
    let result = services
        .registry
        .get_aggregate(&DomainKey::from(domain), &AggregateKey::from(aggregate))
        .await;

    match result {
        Ok(Some(aggregate)) => (StatusCode::OK, Json(aggregate)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "no such aggregate"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /aggregates/:domain/:aggregate/:token
///
/// 201 on admission, 202 when the source is already registered under the
/// collection token (idempotent no-op).
pub async fn append_source(
    Extension(services): Extension<Arc<AppServices>>,
    Path((domain, aggregate, token)): Path<(String, String, String)>,
    body: Result<Json<dto::SourceRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::body_rejection_to_response(rejection),
    };

    let result = services
        .registry
        .append_new_source(
            &DomainKey::from(domain),
            &AggregateKey::from(aggregate),
            &CollectionToken::from(token),
            body.into(),
        )
        .await;

    match result {
        Ok(Some(source)) => (StatusCode::CREATED, Json(source)).into_response(),
        Ok(None) => (StatusCode::ACCEPTED, Json(json!({"Duplicate": true}))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
