use crate::state::AppState;
use axum::{
    extract::State,
    http::{self, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use panchang_chat::{
    agent::{Agent, AgentEvent},
    models::message::{Message, MessageContent},
    models::role::Role,
    models::tool::ToolCall,
    panchang::PanchangSystem,
    protocol::{
        ChatRequest, FinishReason, StreamPart, StreamUsage, ToolInvocation, UiMessage, UiPart,
    },
    providers::{base::Usage, factory},
};
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_stream::wrappers::ReceiverStream;

const HEARTBEAT: Duration = Duration::from_millis(500);

// Custom SSE response type that implements the Vercel AI SDK protocol
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        let mut response = http::Response::new(body);
        let headers = response.headers_mut();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(
            http::header::CACHE_CONTROL,
            http::HeaderValue::from_static("no-cache"),
        );
        headers.insert(
            http::header::CONNECTION,
            http::HeaderValue::from_static("keep-alive"),
        );
        headers.insert(
            "x-vercel-ai-data-stream",
            http::HeaderValue::from_static("v1"),
        );
        response
    }
}

fn tool_cycle(invocation: ToolInvocation) -> (Message, Message) {
    let request = Message::assistant().with_tool_request(
        invocation.tool_call_id.clone(),
        Ok(ToolCall::new(invocation.tool_name, invocation.args)),
    );
    let response = Message::user()
        .with_tool_response(invocation.tool_call_id, Ok(invocation.result.unwrap_or_default()));
    (request, response)
}

// Replay an assistant turn as alternating model and tool messages, keeping part order
fn convert_assistant(msg: UiMessage, messages: &mut Vec<Message>) {
    let parts = if msg.parts.is_empty() {
        // Older clients only send toolInvocations and the joined content
        let mut parts: Vec<UiPart> = msg
            .tool_invocations
            .into_iter()
            .map(|tool_invocation| UiPart::ToolInvocation { tool_invocation })
            .collect();
        if !msg.content.is_empty() {
            parts.push(UiPart::Text { text: msg.content });
        }
        parts
    } else {
        msg.parts
    };

    let mut pending = Message::assistant();
    if let Some(id) = msg.id {
        pending = pending.with_id(id);
    }

    for part in parts {
        match part {
            UiPart::Text { text } => {
                if !text.is_empty() {
                    pending = pending.with_text(text);
                }
            }
            UiPart::ToolInvocation { tool_invocation } => {
                // Calls that never got a result cannot be paired, the model never sees them
                if !tool_invocation.is_complete() {
                    continue;
                }
                let (request, response) = tool_cycle(tool_invocation);
                for content in request.content {
                    pending = pending.with_content(content);
                }
                messages.push(std::mem::replace(&mut pending, Message::assistant()));
                messages.push(response);
            }
            UiPart::Other => {}
        }
    }

    if !pending.content.is_empty() {
        messages.push(pending);
    }
}

// Convert incoming messages to our internal Message type
fn convert_messages(incoming: Vec<UiMessage>) -> Vec<Message> {
    let mut messages = Vec::new();

    for msg in incoming {
        match msg.role.parse::<Role>() {
            Ok(Role::User) => {
                let text = if msg.content.is_empty() {
                    msg.parts
                        .iter()
                        .filter_map(|part| match part {
                            UiPart::Text { text } => Some(text.as_str()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("")
                } else {
                    msg.content
                };
                messages.push(Message::user().with_text(text));
            }
            Ok(Role::System) => {
                messages.push(Message::system().with_text(msg.content));
            }
            Ok(Role::Assistant) => convert_assistant(msg, &mut messages),
            Err(_) => {
                tracing::warn!("Unknown role: {}", msg.role);
            }
        }
    }

    messages
}

async fn send(
    tx: &mpsc::Sender<String>,
    part: StreamPart,
) -> Result<(), mpsc::error::SendError<String>> {
    tx.send(part.encode()).await
}

async fn stream_event(
    event: AgentEvent,
    tx: &mpsc::Sender<String>,
) -> Result<(), mpsc::error::SendError<String>> {
    match event {
        AgentEvent::StepStarted { message_id } => {
            send(tx, StreamPart::StartStep { message_id }).await
        }
        AgentEvent::TextDelta(text) => send(tx, StreamPart::Text(text)).await,
        AgentEvent::Message(message) => stream_message(message, tx).await,
        AgentEvent::StepFinished {
            finish_reason,
            usage,
        } => {
            send(
                tx,
                StreamPart::FinishStep {
                    finish_reason,
                    usage: usage.into(),
                    is_continued: false,
                },
            )
            .await
        }
    }
}

async fn stream_message(
    message: Message,
    tx: &mpsc::Sender<String>,
) -> Result<(), mpsc::error::SendError<String>> {
    match message.role {
        Role::User => {
            // Only tool responses are forwarded, the client already has its own user turns
            for content in message.content {
                if let MessageContent::ToolResponse(response) = content {
                    let result = match response.tool_result {
                        Ok(result) => result,
                        Err(err) => json!({ "error": err.to_string() }),
                    };
                    send(
                        tx,
                        StreamPart::ToolResult {
                            tool_call_id: response.id,
                            result,
                        },
                    )
                    .await?;
                }
            }
        }
        Role::Assistant => {
            // Text was already forwarded as it streamed in
            for content in message.content {
                match content {
                    MessageContent::ToolRequest(request) => {
                        let (tool_name, args) = match request.tool_call {
                            Ok(tool_call) => (tool_call.name, tool_call.arguments),
                            // An invalid call stays in the transcript, its error arrives as the result
                            Err(_) => ("invalid name".to_string(), json!({})),
                        };
                        send(
                            tx,
                            StreamPart::ToolCall {
                                tool_call_id: request.id,
                                tool_name,
                                args,
                            },
                        )
                        .await?;
                    }
                    MessageContent::Text(_) | MessageContent::ToolResponse(_) => continue,
                }
            }
        }
        Role::System => {}
    }
    Ok(())
}

async fn fail(tx: &mpsc::Sender<String>, error: String, usage: Usage) {
    let _ = send(tx, StreamPart::Error(error)).await;
    let _ = send(
        tx,
        StreamPart::FinishMessage {
            finish_reason: FinishReason::Error,
            usage: usage.into(),
        },
    )
    .await;
}

// Drive one reply to completion, writing protocol parts as events arrive
async fn produce(
    agent: Agent,
    messages: Vec<Message>,
    tx: mpsc::Sender<String>,
    max_duration: Duration,
) {
    let deadline = Instant::now() + max_duration;

    let mut stream = match agent.reply(&messages).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Failed to start reply stream: {}", e);
            fail(&tx, e.to_string(), Usage::default()).await;
            return;
        }
    };

    let mut usage = Usage::default();
    let mut finish_reason = FinishReason::Stop;

    loop {
        if Instant::now() >= deadline {
            tracing::warn!(?max_duration, "reply exceeded its time limit");
            fail(
                &tx,
                format!("Reply exceeded {} seconds", max_duration.as_secs()),
                usage,
            )
            .await;
            return;
        }

        let wait = HEARTBEAT.min(deadline.saturating_duration_since(Instant::now()));
        match timeout(wait, stream.next()).await {
            Ok(Some(Ok(event))) => {
                if let AgentEvent::StepFinished {
                    finish_reason: reason,
                    usage: step_usage,
                } = &event
                {
                    usage = usage.combine(step_usage);
                    finish_reason = *reason;
                }
                if let Err(e) = stream_event(event, &tx).await {
                    tracing::info!("Client went away: {}", e);
                    return;
                }
            }
            Ok(Some(Err(e))) => {
                tracing::error!("Error processing message: {}", e);
                fail(&tx, e.to_string(), usage).await;
                return;
            }
            Ok(None) => break,
            Err(_) => {
                // Heartbeat, used to detect disconnected clients and then stop asking the model
                if tx.is_closed() {
                    tracing::info!("Client disconnected, abandoning reply");
                    return;
                }
            }
        }
    }

    let _ = send(
        &tx,
        StreamPart::FinishMessage {
            finish_reason,
            usage: StreamUsage::from(usage),
        },
    )
    .await;
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    // Clients that name a protocol must ask for the data stream
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let messages = convert_messages(request.messages);
    if messages.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let provider = factory::get_provider(state.provider_config).map_err(|e| {
        tracing::error!("Failed to create provider: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // Each request gets its own agent, nothing is shared between conversations
    let mut agent = Agent::new(provider).with_max_steps(state.max_steps);
    agent.add_system(Arc::new(PanchangSystem::with_client(
        state.http_client,
        state.panchang_config,
    )));

    tracing::info!(messages = messages.len(), "starting reply");

    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(produce(agent, messages, tx, state.max_duration));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panchang_chat::panchang::{Observer, PanchangConfig};
    use panchang_chat::protocol::StreamDecoder;
    use panchang_chat::providers::configs::{OpenAiProviderConfig, ProviderConfig};
    use regex::Regex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn sse(chunks: &[Value]) -> ResponseTemplate {
        let mut body: String = chunks
            .iter()
            .map(|chunk| format!("data: {}\n\n", chunk))
            .collect();
        body.push_str("data: [DONE]\n\n");
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    fn tool_completion(id: &str, name: &str, arguments: Value) -> Vec<Value> {
        vec![
            json!({"choices": [{"index": 0, "delta": {"role": "assistant", "tool_calls": [
                {"index": 0, "id": id, "type": "function",
                 "function": {"name": name, "arguments": arguments.to_string()}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 40, "completion_tokens": 8, "total_tokens": 48}}),
        ]
    }

    /// Streams the text one word at a time
    fn text_completion(text: &str) -> Vec<Value> {
        let mut chunks: Vec<Value> = text
            .split_inclusive(' ')
            .map(|piece| json!({"choices": [{"index": 0, "delta": {"content": piece}}]}))
            .collect();
        chunks.push(json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}));
        chunks.push(json!({"choices": [], "usage": {"prompt_tokens": 60, "completion_tokens": 12, "total_tokens": 72}}));
        chunks
    }

    struct ScriptedCompletions {
        replies: Vec<Vec<Value>>,
        calls: AtomicUsize,
    }

    impl Respond for ScriptedCompletions {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let chunks = self
                .replies
                .get(call)
                .cloned()
                .unwrap_or_else(|| text_completion("Nothing more to add."));
            sse(&chunks)
        }
    }

    /// Answers with the last user message it was sent
    struct Echo;

    impl Respond for Echo {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let last = body["messages"]
                .as_array()
                .unwrap()
                .iter()
                .rev()
                .find(|m| m["role"] == "user")
                .map(|m| m["content"].as_str().unwrap_or_default().to_string())
                .unwrap_or_default();
            sse(&text_completion(&format!("You said {}", last)))
        }
    }

    fn test_state(openai: &str, panchang: &str, max_duration: Duration) -> AppState {
        AppState {
            provider_config: ProviderConfig::OpenAi(OpenAiProviderConfig {
                host: openai.to_string(),
                api_key: "test-key".to_string(),
                model: "gpt-4o".to_string(),
                temperature: None,
                max_tokens: None,
            }),
            panchang_config: PanchangConfig::new(panchang, Observer::default()),
            http_client: reqwest::Client::new(),
            max_steps: 10,
            max_duration,
        }
    }

    fn chat_request(body: Value) -> http::Request<axum::body::Body> {
        http::Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_parts(response: axum::response::Response) -> Vec<StreamPart> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let mut decoder = StreamDecoder::new();
        let parts = decoder
            .push(&bytes)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        decoder.finish().unwrap();
        parts
    }

    fn text_of(parts: &[StreamPart]) -> String {
        parts
            .iter()
            .filter_map(|part| match part {
                StreamPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_convert_user_and_legacy_assistant() {
        let incoming: Vec<UiMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "When is sunrise today?"},
            {
                "id": "msg-1",
                "role": "assistant",
                "content": "Sunrise is at 06:41.",
                "toolInvocations": [{
                    "state": "result",
                    "toolCallId": "call_1",
                    "toolName": "today",
                    "args": {},
                    "result": {"date": "2024-01-15"}
                }]
            },
            {"role": "tool", "content": "ignored"}
        ]))
        .unwrap();

        let messages = convert_messages(incoming);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text(), "When is sunrise today?");

        assert_eq!(messages[1].id, "msg-1");
        let request = messages[1].content[0].as_tool_request().unwrap();
        assert_eq!(request.id, "call_1");
        assert_eq!(request.tool_call.as_ref().unwrap().name, "today");

        let response = messages[2].content[0].as_tool_response().unwrap();
        assert_eq!(response.id, "call_1");
        assert_eq!(response.tool_result, Ok(json!({"date": "2024-01-15"})));

        assert_eq!(messages[3].role, Role::Assistant);
        assert_eq!(messages[3].text(), "Sunrise is at 06:41.");
    }

    #[test]
    fn test_convert_parts_keep_order_and_drop_unfinished_calls() {
        let incoming: Vec<UiMessage> = serde_json::from_value(json!([
            {
                "role": "assistant",
                "content": "",
                "parts": [
                    {"type": "step-start"},
                    {"type": "text", "text": "Let me look that up. "},
                    {"type": "tool-invocation", "toolInvocation": {
                        "state": "result",
                        "toolCallId": "call_1",
                        "toolName": "tithi",
                        "args": {"date": "2024-01-15"},
                        "result": {"tithiName": "Panchami"}
                    }},
                    {"type": "tool-invocation", "toolInvocation": {
                        "state": "call",
                        "toolCallId": "call_2",
                        "toolName": "sunrise",
                        "args": {"date": "2024-01-15"}
                    }},
                    {"type": "text", "text": "It is Panchami."}
                ]
            }
        ]))
        .unwrap();

        let messages = convert_messages(incoming);
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[0].text(), "Let me look that up. ");
        assert_eq!(messages[0].tool_requests().len(), 1);
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content[0].as_tool_response().is_some());
        assert_eq!(messages[2].text(), "It is Panchami.");
        assert!(messages[2].tool_requests().is_empty());
    }

    #[tokio::test]
    async fn test_stream_events_format_parts() {
        let (tx, mut rx) = mpsc::channel(10);
        let events = vec![
            AgentEvent::StepStarted {
                message_id: "m1".to_string(),
            },
            AgentEvent::TextDelta("line one\n".to_string()),
            AgentEvent::TextDelta("line two".to_string()),
            // The finished message repeats the text, only its tool calls are forwarded
            AgentEvent::Message(
                Message::assistant()
                    .with_id("m1")
                    .with_text("line one\nline two")
                    .with_tool_request("call_1", Ok(ToolCall::new("today", json!({}))))
                    .with_tool_request(
                        "call_2",
                        Err(panchang_chat::errors::AgentError::InvalidParameters(
                            "Could not interpret tool use parameters".to_string(),
                        )),
                    ),
            ),
            AgentEvent::Message(Message::user().with_tool_response(
                "call_1",
                Err(panchang_chat::errors::AgentError::ExecutionError(
                    "Failed to fetch sunrise time: Not Found".to_string(),
                )),
            )),
        ];
        for event in events {
            stream_event(event, &tx).await.unwrap();
        }
        drop(tx);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![
                "f:{\"messageId\":\"m1\"}\n".to_string(),
                "0:\"line one\\n\"\n".to_string(),
                "0:\"line two\"\n".to_string(),
                "9:{\"toolCallId\":\"call_1\",\"toolName\":\"today\",\"args\":{}}\n".to_string(),
                "9:{\"toolCallId\":\"call_2\",\"toolName\":\"invalid name\",\"args\":{}}\n".to_string(),
                "a:{\"toolCallId\":\"call_1\",\"result\":{\"error\":\"Tool execution failed: Failed to fetch sunrise time: Not Found\"}}\n".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_sunrise_today_over_http() {
        let openai = MockServer::start().await;
        let panchang = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ScriptedCompletions {
                replies: vec![
                    tool_completion("call_today", "today", json!({})),
                    tool_completion("call_sunrise", "sunrise", json!({"date": "2024-01-15"})),
                    text_completion("Sunrise today is at 06:41:12.\nEnjoy the morning."),
                ],
                calls: AtomicUsize::new(0),
            })
            .expect(3)
            .mount(&openai)
            .await;

        Mock::given(method("GET"))
            .and(path("/sunrise"))
            .and(query_param("date", "2024-01-15T00:00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"06:41:12\""))
            .expect(1)
            .mount(&panchang)
            .await;

        let app = routes(test_state(
            &openai.uri(),
            &panchang.uri(),
            Duration::from_secs(30),
        ));
        let response = app
            .oneshot(chat_request(json!({
                "messages": [{"role": "user", "content": "What time is sunrise today?"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["x-vercel-ai-data-stream"], "v1");

        let parts = read_parts(response).await;

        let calls: Vec<&str> = parts
            .iter()
            .filter_map(|part| match part {
                StreamPart::ToolCall { tool_name, .. } => Some(tool_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec!["today", "sunrise"]);

        let results: Vec<&Value> = parts
            .iter()
            .filter_map(|part| match part {
                StreamPart::ToolResult { result, .. } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["sunriseTime"], "06:41:12");

        // The answer arrives in pieces, inside the last step
        let text_parts = parts
            .iter()
            .filter(|part| matches!(part, StreamPart::Text(_)))
            .count();
        assert!(text_parts > 1);
        let starts = parts
            .iter()
            .filter(|part| matches!(part, StreamPart::StartStep { .. }))
            .count();
        assert_eq!(starts, 3);

        let text = text_of(&parts);
        assert_eq!(text, "Sunrise today is at 06:41:12.\nEnjoy the morning.");
        assert!(Regex::new(r"\b\d{2}:\d{2}(:\d{2})?\b").unwrap().is_match(&text));

        let steps = parts
            .iter()
            .filter(|part| matches!(part, StreamPart::FinishStep { .. }))
            .count();
        assert_eq!(steps, 3);

        assert_eq!(
            parts.last(),
            Some(&StreamPart::FinishMessage {
                finish_reason: FinishReason::Stop,
                usage: StreamUsage {
                    prompt_tokens: 140,
                    completion_tokens: 28,
                },
            })
        );
    }

    #[tokio::test]
    async fn test_rejects_other_protocols() {
        let app = routes(test_state(
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
            Duration::from_secs(30),
        ));
        let mut request = chat_request(json!({
            "messages": [{"role": "user", "content": "hi"}]
        }));
        request
            .headers_mut()
            .insert("x-protocol", http::HeaderValue::from_static("text"));

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_empty_transcript() {
        let app = routes(test_state(
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
            Duration::from_secs(30),
        ));
        let response = app
            .oneshot(chat_request(json!({"messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_provider_failure_ends_stream_with_error() {
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&openai)
            .await;

        let app = routes(test_state(
            &openai.uri(),
            "http://127.0.0.1:9",
            Duration::from_secs(30),
        ));
        let response = app
            .oneshot(chat_request(json!({
                "messages": [{"role": "user", "content": "Which tithi is it?"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let parts = read_parts(response).await;
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], StreamPart::StartStep { .. }));
        match &parts[1] {
            StreamPart::Error(message) => assert!(message.contains("Server error")),
            other => panic!("Expected an error part, got {:?}", other),
        }
        assert!(matches!(
            parts[2],
            StreamPart::FinishMessage {
                finish_reason: FinishReason::Error,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reply_stops_at_time_limit() {
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(sse(&text_completion("too late")).set_delay(Duration::from_secs(5)))
            .mount(&openai)
            .await;

        let app = routes(test_state(
            &openai.uri(),
            "http://127.0.0.1:9",
            Duration::from_secs(1),
        ));
        let response = app
            .oneshot(chat_request(json!({
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .await
            .unwrap();

        let parts = read_parts(response).await;
        assert!(matches!(parts[0], StreamPart::StartStep { .. }));
        assert_eq!(
            parts[1..],
            [
                StreamPart::Error("Reply exceeded 1 seconds".to_string()),
                StreamPart::FinishMessage {
                    finish_reason: FinishReason::Error,
                    usage: StreamUsage::default(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_conversations_stay_separate() {
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(Echo)
            .mount(&openai)
            .await;

        let app = routes(test_state(
            &openai.uri(),
            "http://127.0.0.1:9",
            Duration::from_secs(30),
        ));

        let first = app.clone().oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "alpha"}]
        })));
        let second = app.oneshot(chat_request(json!({
            "messages": [
                {"role": "user", "content": "beta"},
                {"role": "assistant", "content": "You said beta"},
                {"role": "user", "content": "gamma"}
            ]
        })));
        let (first, second) = tokio::join!(first, second);

        let first = text_of(&read_parts(first.unwrap()).await);
        let second = text_of(&read_parts(second.unwrap()).await);
        assert_eq!(first, "You said alpha");
        assert_eq!(second, "You said gamma");
    }
}
