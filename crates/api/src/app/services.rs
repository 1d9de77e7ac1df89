use std::sync::Arc;

use botlnek_store::{DynamoDbRegistry, InMemoryRegistry, SourceRegistry};

/// Engine wiring shared by all handlers.
pub struct AppServices {
    pub registry: Arc<dyn SourceRegistry>,
}

impl AppServices {
    pub fn new(registry: Arc<dyn SourceRegistry>) -> Self {
        Self { registry }
    }
}

/// Select and construct the backend.
///
/// `BOTLNEK_STORE=dynamodb` picks the DynamoDB engine (table from
/// `BOTLNEK_DYNAMODB_TABLE`, endpoint override from
/// `BOTLNEK_DYNAMODB_ENDPOINT`); anything else gets the in-memory engine.
pub async fn build_services() -> AppServices {
    let backend = std::env::var("BOTLNEK_STORE").unwrap_or_else(|_| "memory".to_string());

    match backend.as_str() {
        "dynamodb" => {
            let table = std::env::var("BOTLNEK_DYNAMODB_TABLE")
                .unwrap_or_else(|_| "botlnek".to_string());
            tracing::info!(table, "using dynamodb registry");
            AppServices::new(Arc::new(DynamoDbRegistry::from_env(table).await))
        }
        "memory" => AppServices::new(Arc::new(InMemoryRegistry::new())),
        other => {
            tracing::warn!("unknown BOTLNEK_STORE={other:?}, falling back to in-memory");
            AppServices::new(Arc::new(InMemoryRegistry::new()))
        }
    }
}
