use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use modelgate::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use modelgate::usage::SinkError;
use modelgate::{
    AiError, AiStatus, CallbackError, ChatRequest, Chunk, ChunkCallback, Gateway, GatewayConfig,
    MemoryUsageSink, Message, ModelPreset, ProviderCredentials, ProviderKind, UsageRecord,
    UsageSink,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

enum Reply {
    Body { status: u16, parts: Vec<Vec<u8>> },
    Fail(String),
}

/// In-memory transport that answers requests from a script, in order.
#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn json(self: &Arc<Self>, status: u16, body: Value) -> Arc<Self> {
        self.push(Reply::Body {
            status,
            parts: vec![body.to_string().into_bytes()],
        })
    }

    fn sse(self: &Arc<Self>, parts: &[&str]) -> Arc<Self> {
        self.push(Reply::Body {
            status: 200,
            parts: parts.iter().map(|part| part.as_bytes().to_vec()).collect(),
        })
    }

    fn fail(self: &Arc<Self>, message: &str) -> Arc<Self> {
        self.push(Reply::Fail(message.to_string()))
    }

    fn push(self: &Arc<Self>, reply: Reply) -> Arc<Self> {
        self.replies.lock().expect("lock").push_back(reply);
        Arc::clone(self)
    }

    fn next(&self, request: HttpRequest) -> Reply {
        self.requests.lock().expect("lock").push(request);
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .expect("unexpected request")
    }

    fn request_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .map(|request| request.url.clone())
            .collect()
    }

    fn request_body(&self, index: usize) -> Value {
        let requests = self.requests.lock().expect("lock");
        serde_json::from_slice(requests[index].body.as_deref().expect("body")).expect("json")
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AiError> {
        match self.next(request) {
            Reply::Body { status, parts } => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: parts.concat(),
            }),
            Reply::Fail(message) => Err(AiError::transport(message)),
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AiError> {
        match self.next(request) {
            Reply::Body { status, parts } => Ok(HttpStreamResponse {
                status,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(parts.into_iter().map(Ok))),
            }),
            Reply::Fail(message) => Err(AiError::transport(message)),
        }
    }
}

struct FailingSink;

#[async_trait]
impl UsageSink for FailingSink {
    async fn record(&self, _record: UsageRecord) -> Result<(), SinkError> {
        Err(SinkError::new("database unavailable"))
    }
}

fn config() -> GatewayConfig {
    GatewayConfig::default()
        .with_openai(ProviderCredentials::new("sk-openai"))
        .with_openrouter(ProviderCredentials::new("sk-or"))
        .with_anthropic(ProviderCredentials::new("sk-ant"))
}

fn gateway(
    transport: Arc<ScriptedTransport>,
    preset: ModelPreset,
) -> (Gateway, Arc<MemoryUsageSink>) {
    let sink = Arc::new(MemoryUsageSink::new());
    let gateway = Gateway::builder(config())
        .transport(transport)
        .sink(sink.clone())
        .caller(modelgate::Caller::user(42).with_team(7).with_ip("10.0.0.1"))
        .preset(preset)
        .build()
        .expect("gateway");
    (gateway, sink)
}

fn hello_request() -> ChatRequest {
    ChatRequest::new(vec![
        Message::system("You are a helpful assistant."),
        Message::user("Say hello"),
    ])
}

fn openai_completion(content: &str, finish_reason: &str, usage: (u64, u64)) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason
        }],
        "usage": {"prompt_tokens": usage.0, "completion_tokens": usage.1, "total_tokens": usage.0 + usage.1}
    })
}

#[tokio::test]
async fn openai_single_response_is_normalized_and_logged() {
    let transport = Arc::new(ScriptedTransport::default()).json(
        200,
        openai_completion("hello", "stop", (2, 1)),
    );
    let (gateway, sink) = gateway(transport.clone(), ModelPreset::Gpt4oMini);

    let response = gateway
        .chat("Greeting", hello_request(), None)
        .await
        .expect("chat");

    assert_eq!(response.content, "hello");
    assert_eq!(response.finish_reason, "stop");
    assert_eq!(
        (
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
            response.usage.total_tokens
        ),
        (2, 1, 3)
    );

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.success);
    assert_eq!(record.user_id, Some(42));
    assert_eq!(record.team_id, Some(7));
    assert_eq!(record.ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(record.provider, ProviderKind::OpenAi);
    assert_eq!(record.model, "gpt-4o-mini");
    assert_eq!(record.request_type, "Greeting");
    assert_eq!(record.response_payload, "hello");
    let logged: Value = serde_json::from_str(&record.request_payload).expect("json");
    assert_eq!(logged[1], json!({"role": "user", "content": "Say hello"}));

    let body = transport.request_body(0);
    assert_eq!(body["user"], json!("42"));
    assert!(body.get("stream").is_none());
}

#[tokio::test]
async fn unaccepted_finish_reason_is_logged_then_raised() {
    let transport = Arc::new(ScriptedTransport::default()).json(
        200,
        openai_completion("truncated", "length", (10, 4096)),
    );
    let (gateway, sink) = gateway(transport, ModelPreset::Gpt4o);

    let err = gateway
        .chat("Summary", hello_request(), None)
        .await
        .unwrap_err();

    match &err {
        AiError::Semantic { message, .. } => assert_eq!(message, "AI API error: length"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status(), AiStatus::Reason("length".into()));

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].usage.map(|usage| usage.total_tokens), Some(4106));
    assert!(records[0].response_payload.contains("\"finish_reason\":\"length\""));
}

#[tokio::test]
async fn transport_failure_is_logged_without_usage() {
    let transport = Arc::new(ScriptedTransport::default()).fail("connection reset by peer");
    let (gateway, sink) = gateway(transport, ModelPreset::ClaudeHaiku);

    let err = gateway
        .chat("Summary", hello_request(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Transport { .. }));
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].usage, None);
    assert_eq!(records[0].cost(), 0.0);
    assert_eq!(
        records[0].response_payload,
        "Unknown: connection reset by peer"
    );
}

#[tokio::test]
async fn provider_http_error_keeps_upstream_status() {
    let transport = Arc::new(ScriptedTransport::default()).json(
        429,
        json!({"error": {"message": "Rate limit reached", "type": "requests"}}),
    );
    let (gateway, sink) = gateway(transport, ModelPreset::Gpt4o);

    let err = gateway
        .chat("Summary", hello_request(), None)
        .await
        .unwrap_err();

    assert_eq!(err.status(), AiStatus::Http(429));
    assert_eq!(sink.records()[0].response_payload, "429: Rate limit reached");
}

#[tokio::test]
async fn rejected_request_is_logged_with_http_status() {
    let transport = Arc::new(ScriptedTransport::default()).json(
        400,
        json!({"error": {"message": "Invalid 'messages'", "type": "invalid_request_error"}}),
    );
    let (gateway, sink) = gateway(transport, ModelPreset::Gpt4oMini);

    let err = gateway
        .chat("Summary", hello_request(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Validation { status: Some(400), .. }));
    assert_eq!(err.status(), AiStatus::Http(400));
    assert_eq!(sink.records()[0].response_payload, "400: Invalid 'messages'");
}

#[tokio::test]
async fn anthropic_query_extracts_system_and_repairs_json() {
    let transport = Arc::new(ScriptedTransport::default()).json(
        200,
        json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "\"key\": 1}\n"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 20, "output_tokens": 5}
        }),
    );
    let (gateway, sink) = gateway(transport.clone(), ModelPreset::ClaudeSonnet);
    let request = ChatRequest::new(vec![
        Message::system("A"),
        Message::user("B"),
        Message::system("C"),
    ])
    .json();

    let response = gateway.chat("Extract", request, None).await.expect("chat");

    assert_eq!(response.content, "{\"key\": 1}");
    assert_eq!(response.usage.total_tokens, 25);

    let body = transport.request_body(0);
    assert_eq!(body["model"], json!("claude-3-5-sonnet-20240620"));
    assert_eq!(body["system"], json!("A\nC"));
    assert_eq!(
        body["messages"],
        json!([{"role": "user", "content": "B"}, {"role": "assistant", "content": "{"}])
    );
    assert_eq!(body["metadata"]["user_id"], json!("42"));

    let records = sink.records();
    let record = &records[0];
    assert!(record.success);
    assert!((record.cost() - (20.0 * 3.0 + 5.0 * 15.0) / 1_000_000.0).abs() < 1e-12);
}

#[tokio::test]
async fn anthropic_stream_forwards_text_and_uses_reported_usage() {
    let transport = Arc::new(ScriptedTransport::default()).sse(&[
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":11,\"output_tokens\":1}}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\nevent: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,",
        "\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ]);
    let (gateway, sink) = gateway(transport.clone(), ModelPreset::ClaudeHaiku);
    let (tx, mut rx) = mpsc::channel(16);
    let mut callback = ChunkCallback::forward_text(tx);

    let response = gateway
        .chat("Stream", hello_request(), Some(&mut callback))
        .await
        .expect("chat");

    assert_eq!(response.content, "Hello");
    assert_eq!(response.finish_reason, "end_turn");
    assert_eq!(response.usage.prompt_tokens, 11);
    assert_eq!(response.usage.completion_tokens, 2);
    assert!(response.streamed);
    assert_eq!(callback.failures(), 0);

    let mut forwarded = Vec::new();
    while let Ok(text) = rx.try_recv() {
        forwarded.push(text);
    }
    assert_eq!(forwarded, vec!["Hel".to_string(), "lo".to_string()]);

    assert_eq!(transport.request_body(0)["stream"], json!(true));
    assert_eq!(sink.records().len(), 1);
    assert!(sink.records()[0].success);
}

#[tokio::test]
async fn openai_stream_survives_failing_callback() {
    let transport = Arc::new(ScriptedTransport::default()).sse(&[
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    ]);
    let (gateway, sink) = gateway(transport, ModelPreset::Gpt4oMini);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let mut callback = ChunkCallback::new(move |chunk: &Chunk| {
        log.lock().expect("lock").push(chunk.payload.clone());
        Err(CallbackError::Other("websocket closed".into()))
    });

    let response = gateway
        .chat("Stream", hello_request(), Some(&mut callback))
        .await
        .expect("chat");

    assert_eq!(response.content, "Hi there");
    assert_eq!(response.finish_reason, "stop");
    assert_eq!(response.usage.completion_tokens, 4);
    assert!(response.usage.prompt_tokens > 0);
    assert_eq!(
        response.usage.total_tokens,
        response.usage.prompt_tokens + response.usage.completion_tokens
    );
    assert_eq!(callback.failures(), 4);
    assert_eq!(seen.lock().expect("lock").len(), 4);
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn mid_stream_error_is_raised_and_logged_once() {
    let transport = Arc::new(ScriptedTransport::default()).sse(&[
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"upstream overloaded\",\"code\":503}}\n\n",
    ]);
    let (gateway, sink) = gateway(transport, ModelPreset::Gpt4o);
    let mut callback = ChunkCallback::from_fn(|_| {});

    let err = gateway
        .chat("Stream", hello_request(), Some(&mut callback))
        .await
        .unwrap_err();

    assert_eq!(err.message(), "upstream overloaded");
    assert_eq!(err.status(), AiStatus::Http(503));
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
}

#[tokio::test]
async fn sink_failure_does_not_mask_result() {
    let transport = Arc::new(ScriptedTransport::default())
        .json(200, openai_completion("hello", "stop", (2, 1)))
        .json(200, openai_completion("cut", "content_filter", (2, 1)));
    let gateway = Gateway::builder(config())
        .transport(transport)
        .sink(Arc::new(FailingSink))
        .build()
        .expect("gateway");

    let ok = gateway.chat("Greeting", hello_request(), None).await;
    assert_eq!(ok.expect("chat").content, "hello");

    let err = gateway
        .chat("Greeting", hello_request(), None)
        .await
        .unwrap_err();
    assert_eq!(err.message(), "AI API error: content_filter");
}

#[tokio::test]
async fn switching_presets_changes_family_atomically() {
    let transport = Arc::new(ScriptedTransport::default())
        .json(200, openai_completion("from openai", "stop", (1, 1)))
        .json(
            200,
            json!({
                "content": [{"type": "text", "text": "from claude"}],
                "stop_reason": "stop_sequence",
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }),
        );
    let (mut gateway, sink) = gateway(transport.clone(), ModelPreset::FAST);

    let first = gateway.chat("A", hello_request(), None).await.expect("chat");
    gateway.use_preset(ModelPreset::BALANCED).expect("switch");
    let second = gateway.chat("B", hello_request(), None).await.expect("chat");

    assert_eq!(first.content, "from openai");
    assert_eq!(second.content, "from claude");
    assert_eq!(
        transport.request_urls(),
        vec![
            "https://api.openai.com/v1/chat/completions".to_string(),
            "https://api.anthropic.com/v1/messages".to_string(),
        ]
    );
    let records = sink.records();
    assert_eq!(records[0].provider, ProviderKind::OpenAi);
    assert_eq!(records[1].provider, ProviderKind::Anthropic);
    assert_eq!(records[1].model, "claude-3-5-sonnet-20240620");
}

#[tokio::test]
async fn concurrent_calls_each_log_one_record() {
    let transport = Arc::new(ScriptedTransport::default())
        .json(200, openai_completion("one", "stop", (1, 1)))
        .json(200, openai_completion("two", "stop", (1, 1)));
    let (gateway, sink) = gateway(transport, ModelPreset::Gpt4o);
    let gateway = Arc::new(gateway);

    let (a, b) = tokio::join!(
        gateway.chat("A", hello_request(), None),
        gateway.chat("B", hello_request(), None)
    );

    assert!(a.is_ok() && b.is_ok());
    let mut types: Vec<_> = sink
        .records()
        .into_iter()
        .map(|record| record.request_type)
        .collect();
    types.sort();
    assert_eq!(types, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn image_generation_uses_openai_without_switching() {
    let transport = Arc::new(ScriptedTransport::default()).json(
        200,
        json!({"created": 1, "data": [{"url": "https://images.example/cat.png"}]}),
    );
    let (gateway, sink) = gateway(transport.clone(), ModelPreset::ClaudeHaiku);

    let image = gateway
        .generate_image("a cat in a hat", None)
        .await
        .expect("image");

    assert_eq!(image.url, "https://images.example/cat.png");
    assert_eq!(gateway.profile().kind, ProviderKind::Anthropic);
    assert_eq!(
        transport.request_urls(),
        vec!["https://api.openai.com/v1/images/generations".to_string()]
    );
    assert_eq!(transport.request_body(0)["size"], json!("1024x1024"));

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].request_type, "AiImage");
    assert_eq!(records[0].model, "dall-e-3");
    assert_eq!(records[0].request_payload, "a cat in a hat");
}

#[tokio::test]
async fn empty_image_result_is_an_error_and_unsuccessful_record() {
    let transport = Arc::new(ScriptedTransport::default()).json(200, json!({"data": []}));
    let (gateway, sink) = gateway(transport, ModelPreset::Gpt4o);

    let err = gateway
        .generate_image("nothing", Some("512x512"))
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::EmptyResult { .. }));
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
}
