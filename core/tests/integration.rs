//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts the mock server on a random port and drives the client
//! over real HTTP and WebSocket connections with the reqwest transport. This
//! checks that request building, status mapping, rate limiting and both
//! stream executors agree with an actual server.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};
use mock_server::{Echo, Item};
use netkit_core::{
    Client, ClientConfig, ClientError, Environment, ErrorCode, ErrorPayload, NetworkError,
    QueryItems, Request, RequestOptions, ReqwestTransport, Scheme, WebSocket, WebSocketMessage,
    WebSocketRoute,
};

async fn start_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run(listener));
    addr
}

fn environment(addr: SocketAddr) -> Environment {
    Environment::new(Scheme::Http, addr.to_string()).with_api_version("v1")
}

async fn client() -> Client<ReqwestTransport> {
    Client::new(environment(start_server().await), ReqwestTransport::new())
}

/// Polls the mock server until the ticking stream `id` is no longer served.
async fn stream_closes(id: &str) -> bool {
    for _ in 0..100 {
        if !mock_server::stream_is_live(id) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// --- requests ---

#[tokio::test]
async fn json_body_and_sorted_query_reach_server() {
    let client = client().await;
    let request = Request::<_, Echo>::post("echo")
        .with_options(RequestOptions::with_query(|q| {
            q.add("zeta", Some(1)).add("alpha", Some(true)).add::<u8>("skip", None);
        }))
        .with_body(Item::new("A"));

    let echo = client.send(&request).await.unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.query.as_deref(), Some("alpha=true&zeta=1"));
    assert_eq!(echo.headers["content-type"], "application/json");
    assert_eq!(echo.body, r#"{"name":"A"}"#);
}

#[tokio::test]
async fn environment_headers_are_sent_and_overridable() {
    let env = environment(start_server().await)
        .with_header("X-Env", "env")
        .with_header("X-Test", "0")
        .with_api_key("secret");
    let client = Client::new(env, ReqwestTransport::new());

    let request = Request::<_, Echo>::get("echo").with_header("x-test", "1");
    let echo = client.send(&request).await.unwrap();
    assert_eq!(echo.headers["x-env"], "env");
    assert_eq!(echo.headers["x-test"], "1");
    assert_eq!(echo.headers["authorization"], "Bearer secret");
}

#[tokio::test]
async fn form_body_is_urlencoded() {
    let client = client().await;
    let request = Request::<_, BTreeMap<String, String>>::post("form")
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_body(vec![("name", "Ada Lovelace"), ("lang", "en")]);

    let fields = client.send(&request).await.unwrap();
    assert_eq!(fields["name"], "Ada Lovelace");
    assert_eq!(fields["lang"], "en");
}

#[tokio::test]
async fn query_builder_handles_floats_and_lists() {
    let client = client().await;
    let mut query = QueryItems::new();
    query
        .add_float("price", Some(1.5), 2)
        .add_joined("ids", Some(&["a", "b"][..]), ",");
    let request = Request::<_, Echo>::get("echo").with_options(RequestOptions {
        query_items: query.into_items(),
        ..RequestOptions::default()
    });

    let echo = client.send(&request).await.unwrap();
    assert_eq!(echo.query.as_deref(), Some("ids=a%2Cb&price=1.50"));
}

// --- errors ---

#[tokio::test]
async fn structured_error_body_is_network_error_by_default() {
    let client = client().await;
    let err = client
        .send(&Request::<_, serde_json::Value>::get("errors/api"))
        .await
        .unwrap_err();

    match err {
        ClientError::Network(NetworkError::Status { status, payload }) => {
            assert_eq!(status, 400);
            assert!(matches!(payload, ErrorPayload::Structured(_)));
            assert_eq!(payload.api_error().unwrap().code, ErrorCode::ValidationError);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn structured_error_body_becomes_api_error_when_enabled() {
    let config = ClientConfig {
        structured_api_errors: true,
        ..ClientConfig::default()
    };
    let client = Client::builder(environment(start_server().await), ReqwestTransport::new())
        .config(config)
        .build();

    let err = client
        .send(&Request::<_, serde_json::Value>::get("errors/api"))
        .await
        .unwrap_err();
    match err {
        ClientError::Api(api) => {
            assert_eq!(api.status, 400);
            assert_eq!(api.message, "name is required");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn text_error_body_is_kept_verbatim() {
    let client = client().await;
    let err = client
        .send(&Request::<_, serde_json::Value>::get("errors/text"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(matches!(
        err,
        ClientError::Network(NetworkError::Status { payload: ErrorPayload::Text(ref t), .. }) if t == "internal failure"
    ));
}

#[tokio::test]
async fn connection_failure_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::new(environment(addr), ReqwestTransport::new());
    let err = client
        .send(&Request::<_, serde_json::Value>::get("echo"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Network(NetworkError::Transport(_))));
}

// --- rate limiting ---

#[tokio::test]
async fn exhausted_quota_delays_next_request() {
    let client = client().await;
    client
        .send_raw(&Request::<_, ()>::get("rate-limited"))
        .await
        .unwrap();
    assert_eq!(client.rate_limiter().state().await.remaining, Some(0));

    let started = Instant::now();
    client
        .send_raw(&Request::<_, ()>::get("echo"))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
}

// --- events ---

#[tokio::test]
async fn recorded_events_cover_success_and_failure() {
    let client = Client::builder(environment(start_server().await), ReqwestTransport::new())
        .record_events()
        .build();
    client
        .send_raw(&Request::<_, ()>::get("echo"))
        .await
        .unwrap();
    let _ = client
        .send_raw(&Request::<_, ()>::get("errors/text"))
        .await;

    let events = client.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status_code, 200);
    assert_eq!(events[1].status_code, 500);
    assert!(events[0].response_bytes > 0);
    assert_eq!(events[1].host.as_deref(), Some("127.0.0.1"));
}

// --- server-sent events ---

#[tokio::test]
async fn sse_stream_yields_items_in_order() {
    let client = client().await;
    let items: Vec<Item> = client
        .sse_stream(&Request::<_, ()>::get("events"))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(items, [Item::new("A"), Item::new("B")]);
}

#[tokio::test]
async fn sse_json_array_fallback() {
    let client = client().await;
    let items: Vec<Item> = client
        .sse_stream(&Request::<_, ()>::get("events/array"))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(items, [Item::new("A"), Item::new("B")]);
}

#[tokio::test]
async fn sse_malformed_event_ends_stream() {
    let client = client().await;
    let mut events = client
        .sse_stream::<Item, _, _>(&Request::<_, ()>::get("events/malformed"))
        .unwrap();
    assert_eq!(events.next().await.unwrap().unwrap(), Item::new("A"));
    assert!(matches!(
        events.next().await,
        Some(Err(ClientError::Decoding(_)))
    ));
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn sse_unavailable_reports_status() {
    let client = client().await;
    let mut events = client
        .sse_stream::<Item, _, _>(&Request::<_, ()>::get("events/unavailable"))
        .unwrap();
    match events.next().await {
        Some(Err(ClientError::Network(NetworkError::Status {
            status: 503,
            payload: ErrorPayload::Text(text),
        }))) => assert_eq!(text, "maintenance"),
        other => panic!("unexpected item: {other:?}"),
    }
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn dropping_an_sse_stream_closes_the_connection() {
    let client = client().await;
    let request = Request::<_, ()>::get("events/ticking").with_query("id", "reqwest-drop");
    let mut ticks = client.sse_stream::<Item, _, _>(&request).unwrap();

    assert_eq!(ticks.next().await.unwrap().unwrap(), Item::new("tick"));
    assert!(mock_server::stream_is_live("reqwest-drop"));

    drop(ticks);
    assert!(stream_closes("reqwest-drop").await);
}

// --- websocket ---

#[tokio::test]
async fn websocket_feed_decodes_text_and_binary_frames() {
    let client = client().await;
    let route = WebSocketRoute::new("feed").with_initial_message(Item::new("C"));
    let mut feed = client.connect_websocket::<Item, _>(&route).await.unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(feed.values.next().await.unwrap().unwrap());
    }
    assert_eq!(received, [Item::new("A"), Item::new("B"), Item::new("C")]);

    feed.socket.close().await.unwrap();
}

#[tokio::test]
async fn websocket_send_is_echoed() {
    let client = client().await;
    let mut feed = client
        .connect_websocket::<Item, _>(&WebSocketRoute::new("feed"))
        .await
        .unwrap();
    feed.socket
        .send(WebSocketMessage::Text(r#"{"name":"D"}"#.to_string()))
        .await
        .unwrap();
    feed.socket.ping().await.unwrap();

    let received: Vec<Item> = feed.values.by_ref().take(3).try_collect().await.unwrap();
    assert_eq!(received, [Item::new("A"), Item::new("B"), Item::new("D")]);
}

// --- ureq backend ---

#[cfg(feature = "ureq-transport")]
#[tokio::test(flavor = "multi_thread")]
async fn ureq_transport_round_trip() {
    use netkit_core::UreqTransport;

    let client = Client::new(environment(start_server().await), UreqTransport::new());
    let echo = client
        .send(&Request::<_, Echo>::put("echo").with_body(Item::new("A")))
        .await
        .unwrap();
    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.body, r#"{"name":"A"}"#);

    let items: Vec<Item> = client
        .sse_stream(&Request::<_, ()>::get("events"))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(items, [Item::new("A"), Item::new("B")]);
}

#[cfg(feature = "ureq-transport")]
#[tokio::test(flavor = "multi_thread")]
async fn ureq_dropped_stream_closes_the_connection() {
    use netkit_core::UreqTransport;

    let client = Client::new(environment(start_server().await), UreqTransport::new());
    let request = Request::<_, ()>::get("events/ticking").with_query("id", "ureq-drop");
    let mut ticks = client.sse_stream::<Item, _, _>(&request).unwrap();

    assert_eq!(ticks.next().await.unwrap().unwrap(), Item::new("tick"));
    assert!(mock_server::stream_is_live("ureq-drop"));

    drop(ticks);
    assert!(stream_closes("ureq-drop").await);
}

#[cfg(feature = "ureq-transport")]
#[tokio::test(flavor = "multi_thread")]
async fn ureq_stream_ends_at_request_timeout() {
    use netkit_core::UreqTransport;

    let client = Client::new(environment(start_server().await), UreqTransport::new());
    let request = Request::<_, ()>::get("events/ticking")
        .with_query("id", "ureq-timeout")
        .with_timeout(Duration::from_millis(300));
    let mut ticks = client.sse_stream::<Item, _, _>(&request).unwrap();

    let started = Instant::now();
    let mut failure = None;
    while let Some(item) = ticks.next().await {
        if let Err(err) = item {
            failure = Some(err);
            break;
        }
    }
    let elapsed = started.elapsed();
    assert!(
        matches!(failure, Some(ClientError::Network(NetworkError::Timeout))),
        "{failure:?}"
    );
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert!(stream_closes("ureq-timeout").await);
}
