use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use botlnek_api::app;
use botlnek_api::app::services::AppServices;
use botlnek_store::InMemoryRegistry;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, pinned to the in-memory engine and bound to an
        // ephemeral port.
        let services = Arc::new(AppServices::new(Arc::new(InMemoryRegistry::new())));
        let app = app::build_app_with(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn root_echoes_method_and_path() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["HttpMethod"], "GET");
    assert_eq!(body["Path"], "/");
    assert!(body["RemoteAddr"].as_str().unwrap().starts_with("127.0.0.1"));
}

#[tokio::test]
async fn domain_listing_is_a_placeholder() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/domains", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn domain_create_lookup_and_redundant_append() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/domains", srv.base_url))
        .json(&json!({"Key": "D", "Attrs": {"a": "Aye"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .get(format!("{}/domains/D", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["Key"], "D");
    assert_eq!(body["Attrs"]["a"], "Aye");

    // Second append with the same key: accepted but a no-op.
    let res = client
        .post(format!("{}/domains", srv.base_url))
        .json(&json!({"Key": "D", "Attrs": {"a": "other"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client
        .get(format!("{}/domains/D", srv.base_url))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["Attrs"]["a"], "Aye");
}

#[tokio::test]
async fn missing_entities_are_404() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/domains/nope", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/aggregates/D/nope", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn source_appends_build_an_ordered_aggregate() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let s1 = json!({"Keys": {"id": "s1"}, "Attrs": {"note": "first"}});
    let s2 = json!({"Keys": {"id": "s2"}, "Attrs": {}});

    for (token, source) in [("T1", &s1), ("T2", &s1), ("T1", &s2), ("T2", &s2)] {
        let res = client
            .post(format!("{}/aggregates/D/A/{}", srv.base_url, token))
            .json(source)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    // Duplicate admission under T1 is accepted but changes nothing.
    let res = client
        .post(format!("{}/aggregates/D/A/T1", srv.base_url))
        .json(&s1)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client
        .get(format!("{}/aggregates/D/A", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();

    assert_eq!(body["Key"], "A");
    assert_eq!(body["Log"].as_array().unwrap().len(), 4);
    assert_eq!(body["Log"][0]["SeqNum"], "0000000000000000");

    let t1: Vec<u64> = body["Sources"]["T1"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["VersionIdx"].as_u64().unwrap())
        .collect();
    let t2: Vec<u64> = body["Sources"]["T2"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["VersionIdx"].as_u64().unwrap())
        .collect();
    assert_eq!(t1, vec![0, 2]);
    assert_eq!(t2, vec![1, 3]);

    assert_eq!(body["Sources"]["T1"][0]["Source"]["Keys"]["id"], "s1");
    assert_eq!(body["Sources"]["T1"][0]["Source"]["Attrs"]["note"], "first");
}

#[tokio::test]
async fn malformed_bodies_are_rejected_with_400() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Not JSON at all.
    let res = client
        .post(format!("{}/domains", srv.base_url))
        .header("content-type", "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // JSON syntax error.
    let res = client
        .post(format!("{}/aggregates/D/A/T", srv.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn event_stream_delivers_mutation_post_images() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Attach the stream first so the subscription exists before any append.
    let mut stream = client
        .get(format!("{}/events", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    for i in 0..3 {
        let res = client
            .post(format!("{}/aggregates/D/A/T", srv.base_url))
            .json(&json!({"Keys": {"id": format!("s{i}")}}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    // Read frames until all three post-images arrive. The final segment of
    // the buffer may be a partial line, so only terminated lines count.
    let mut buffered = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let events = loop {
        let mut lines: Vec<&str> = buffered.split('\n').collect();
        lines.pop();
        let complete: Vec<serde_json::Value> = lines
            .into_iter()
            .filter_map(|line| line.strip_prefix("data: "))
            .filter_map(|data| serde_json::from_str(data).ok())
            .collect();
        if complete.len() >= 3 {
            break complete;
        }

        let chunk = tokio::time::timeout_at(deadline, stream.chunk())
            .await
            .expect("timed out waiting for events")
            .unwrap()
            .expect("stream closed early");
        buffered.push_str(&String::from_utf8_lossy(&chunk));
    };

    // The last post-image carries the full token group.
    let event = events.last().unwrap();
    assert_eq!(event["DomainKey"], "D");
    let versions: Vec<u64> = event["Aggregate"]["Sources"]["T"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["VersionIdx"].as_u64().unwrap())
        .collect();
    assert_eq!(versions, vec![0, 1, 2]);
}
