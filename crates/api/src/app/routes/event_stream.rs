//! SSE bridge from a mutation subscription to an HTTP response stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use botlnek_store::SourceRegistry;

use crate::app::services::AppServices;

/// How many post-images a client may lag behind before losing events.
const SUBSCRIBER_BUFFER: usize = 64;

/// GET /events
///
/// Streams the JSON post-image of every mutation as it commits. Delivery is
/// best-effort with no durability: a client that cannot keep up silently
/// misses events, and there is no replay.
pub async fn stream_events(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let (sink, mut mutations) = mpsc::channel::<Vec<u8>>(SUBSCRIBER_BUFFER);
    let guard = services.registry.subscribe_to_mutations(sink);

    let (tx, rx) = mpsc::unbounded_channel::<Result<SseEvent, Infallible>>();

    // Forwarding task owns the subscription; client disconnect drops the
    // receiver, which ends the task and unsubscribes via the guard.
    tokio::spawn(async move {
        let _guard = guard;
        while let Some(payload) = mutations.recv().await {
            let data = String::from_utf8_lossy(&payload).into_owned();
            if tx.send(Ok(SseEvent::default().event("mutation").data(data))).is_err() {
                break;
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
