use axum::routing::{get, post};
use axum::Router;

pub mod aggregates;
pub mod domains;
pub mod event_stream;
pub mod system;

/// Router for the whole JSON surface.
pub fn router() -> Router {
    Router::new()
        .route("/", get(system::echo))
        .route("/domains", get(domains::list_domains).post(domains::append_domain))
        .route("/domains/:key", get(domains::get_domain))
        .route(
            "/aggregates/:domain/:aggregate",
            get(aggregates::get_aggregate),
        )
        .route(
            "/aggregates/:domain/:aggregate/:token",
            post(aggregates::append_source),
        )
        .route("/events", get(event_stream::stream_events))
}
