//! Integration test: run a mock completion endpoint on a free port and drive the real HTTP client
//! and emission core against it. Does not require network access or an API key.

use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use pocket::llm::{CompletionBackend, CompletionClient, GatewayError, HistoryEntry};
use pocket::stream::{ChatStreamer, Pacing, RetryPolicy, StreamError, StreamEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockGateway {
    replies: Mutex<VecDeque<(u16, String)>>,
    seen: Mutex<Vec<(HeaderMap, serde_json::Value)>>,
}

impl MockGateway {
    fn with_replies(replies: &[(u16, &str)]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|(s, b)| (*s, b.to_string())).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

async fn completions(
    State(mock): State<Arc<MockGateway>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, String) {
    mock.seen.lock().unwrap().push((headers, body));
    let (status, body) = mock
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((500, "script exhausted".to_string()));
    (StatusCode::from_u16(status).unwrap(), body)
}

async fn serve(mock: Arc<MockGateway>) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}/v1", addr)
}

fn client(base_url: String) -> CompletionClient {
    CompletionClient::new(Some(base_url), Some("sk-test".to_string())).with_model("test-model")
}

fn streamer(client: CompletionClient) -> ChatStreamer {
    ChatStreamer::new(Arc::new(client))
        .with_system_prompt("You are a test assistant.")
        .with_pacing(Pacing {
            threshold: 20,
            delay: Duration::ZERO,
        })
        .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
}

#[tokio::test]
async fn posts_expected_request_shape() {
    let mock = MockGateway::with_replies(&[(200, r#"{"choices":[{"message":{"content":"hi"}}]}"#)]);
    let base = serve(mock.clone()).await;

    let text = client(base)
        .complete(&[HistoryEntry::user("Hello")])
        .await
        .unwrap();
    assert_eq!(text, "hi");

    let seen = mock.seen.lock().unwrap();
    let (headers, body) = &seen[0];
    assert_eq!(
        headers.get("authorization").and_then(|v| v.to_str().ok()),
        Some("Bearer sk-test")
    );
    assert_eq!(
        headers.get("x-title").and_then(|v| v.to_str().ok()),
        Some("Pocket")
    );
    assert!(headers.get("http-referer").is_some());
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["stream"], false);
    assert!(body["temperature"].is_number());
    assert!(body["max_tokens"].is_number());
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "Hello");
}

#[tokio::test]
async fn end_to_end_emission_with_rate_limit_retry() {
    let reply = "### Hi\n- point one\nplain text here";
    let body = serde_json::json!({ "choices": [{ "message": { "content": reply } }] }).to_string();
    let mock = MockGateway::with_replies(&[(429, "slow down"), (200, body.as_str())]);
    let base = serve(mock.clone()).await;
    let s = streamer(client(base));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    s.on(pocket::stream::EventKind::Chunk, move |e| {
        sink.lock().unwrap().push(e.clone())
    });
    let sink = events.clone();
    s.on(pocket::stream::EventKind::Done, move |e| {
        sink.lock().unwrap().push(e.clone())
    });

    let out = s
        .send_message(&[HistoryEntry::user("Hello")])
        .await
        .unwrap();
    assert_eq!(out, reply);
    assert_eq!(mock.calls(), 2);

    let events = events.lock().unwrap().clone();
    let chunks: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["Hi", "- point one\n", "plain text here\n"]);
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Done {
            text: reply.to_string()
        })
    );

    let seen = mock.seen.lock().unwrap();
    assert_eq!(seen[0].1, seen[1].1, "retry must resend the identical request");
    assert_eq!(seen[0].1["messages"][0]["role"], "system");
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let mock = MockGateway::with_replies(&[(500, "boom"), (503, "boom"), (500, "boom")]);
    let base = serve(mock.clone()).await;
    let s = streamer(client(base));
    let err = s
        .send_message(&[HistoryEntry::user("Hello")])
        .await
        .unwrap_err();
    match err {
        StreamError::Gateway(GatewayError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn bad_request_is_not_retried() {
    let mock = MockGateway::with_replies(&[(400, r#"{"error":"bad"}"#)]);
    let base = serve(mock.clone()).await;
    let err = streamer(client(base))
        .send_message(&[HistoryEntry::user("Hello")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Gateway(GatewayError::Status { status: 400, .. })
    ));
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn alternate_shapes_and_content_errors() {
    let mock = MockGateway::with_replies(&[
        (200, r#"{"choices":[{"text":"legacy text"}]}"#),
        (200, r#"{"response":"top level"}"#),
        (200, r#"{"choices":[]}"#),
        (200, "not json at all"),
    ]);
    let base = serve(mock.clone()).await;
    let c = client(base);
    let history = [HistoryEntry::user("Hello")];

    assert_eq!(c.complete(&history).await.unwrap(), "legacy text");
    assert_eq!(c.complete(&history).await.unwrap(), "top level");
    assert!(c.complete(&history).await.unwrap_err().is_content_error());
    assert!(c.complete(&history).await.unwrap_err().is_content_error());
}

#[tokio::test]
async fn missing_key_never_reaches_the_server() {
    let mock = MockGateway::with_replies(&[(200, r#"{"content":"unused"}"#)]);
    let base = serve(mock.clone()).await;
    let s = ChatStreamer::new(Arc::new(CompletionClient::new(Some(base), None)));
    let err = s
        .send_message(&[HistoryEntry::user("Hello")])
        .await
        .unwrap_err();
    assert!(err.is_configuration_error());
    assert_eq!(mock.calls(), 0);
}
