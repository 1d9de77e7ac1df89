use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    botlnek_observability::init();

    let app = botlnek_api::app::build_app().await;

    let listener = match tokio::net::TcpListener::bind("0.0.0.0:8080").await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind 0.0.0.0:8080: {e}");
            std::process::exit(255);
        }
    };

    tracing::info!("listening on {}", listener.local_addr().expect("listener has no local addr"));

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("server error: {e}");
        std::process::exit(255);
    }
}
