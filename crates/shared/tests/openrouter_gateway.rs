use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use shared::llm::{
    AgentCapability, ChatMessage, ChatModel, ChatRequest, LlmGatewayError, OpenRouterGateway,
    OpenRouterGatewayConfig, OpenRouterModelRoute, template_for_capability,
};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

#[derive(Debug, Clone)]
struct ScriptedReply {
    status: StatusCode,
    body: Value,
    delay: Duration,
}

impl ScriptedReply {
    fn completion(model: &str, content: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({
                "id": "req-success",
                "model": model,
                "choices": [{ "message": { "content": content } }],
                "usage": { "prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20 }
            }),
            delay: Duration::ZERO,
        }
    }

    fn provider_error(status: StatusCode, code: &str) -> Self {
        Self {
            status,
            body: json!({ "error": { "code": code } }),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct Observed {
    models: Vec<String>,
    auth_headers: Vec<String>,
    payloads: Vec<Value>,
}

#[derive(Clone)]
struct ProviderState {
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    observed: Arc<Mutex<Observed>>,
}

/// In-process chat-completions endpoint replaying scripted replies in order.
struct MockProvider {
    url: String,
    state: ProviderState,
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    async fn start(replies: Vec<ScriptedReply>) -> Self {
        let state = ProviderState {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            observed: Arc::new(Mutex::new(Observed::default())),
        };
        let app = Router::new()
            .route("/chat/completions", post(chat_completions))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let local_addr = listener
            .local_addr()
            .expect("listener address should resolve");
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("mock provider should run");
        });

        Self {
            url: format!("http://{local_addr}/chat/completions"),
            state,
            shutdown,
            task,
        }
    }

    fn gateway(&self, max_retries: u32) -> OpenRouterGateway {
        self.gateway_with(|config| config.max_retries = max_retries)
    }

    fn gateway_with(&self, customize: impl FnOnce(&mut OpenRouterGatewayConfig)) -> OpenRouterGateway {
        let mut config = OpenRouterGatewayConfig {
            chat_completions_url: self.url.clone(),
            api_key: "test-openrouter-key".to_string(),
            timeout_ms: 5_000,
            max_retries: 0,
            retry_base_backoff_ms: 0,
            model_route: OpenRouterModelRoute {
                primary_model: "primary-model".to_string(),
                fallback_model: Some("fallback-model".to_string()),
            },
            vision_model: "vision-model".to_string(),
            classifier_model: None,
        };
        customize(&mut config);
        OpenRouterGateway::new(config).expect("gateway should build")
    }

    async fn finish(self) -> Observed {
        self.shutdown.send(()).expect("shutdown signal should send");
        self.task.await.expect("mock provider should join");
        self.state.observed.lock().await.clone()
    }
}

async fn chat_completions(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    {
        let mut observed = state.observed.lock().await;
        if let Some(model) = payload.get("model").and_then(Value::as_str) {
            observed.models.push(model.to_string());
        }
        if let Some(value) = headers
            .get(AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
        {
            observed.auth_headers.push(value.to_string());
        }
        observed.payloads.push(payload);
    }

    let reply = state.replies.lock().await.pop_front().unwrap_or_else(|| {
        ScriptedReply::provider_error(StatusCode::INTERNAL_SERVER_ERROR, "exhausted_test_replies")
    });
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    (reply.status, Json(reply.body))
}

fn request(capability: AgentCapability, text: &str) -> ChatRequest {
    ChatRequest::from_template(template_for_capability(capability))
        .with_requester_id("session:test")
        .with_message(ChatMessage::user(text))
}

#[tokio::test]
async fn router_call_uses_primary_model_and_reports_usage() {
    let provider =
        MockProvider::start(vec![ScriptedReply::completion("provider-model", json!("SEARCH"))]).await;

    let completion = provider
        .gateway(1)
        .complete(request(AgentCapability::Router, "3 bed condos in austin"))
        .await
        .expect("primary response should succeed");
    let observed = provider.finish().await;

    assert_eq!(completion.model, "provider-model");
    assert_eq!(completion.provider_request_id.as_deref(), Some("req-success"));
    assert_eq!(completion.text, "SEARCH");
    assert_eq!(completion.usage.map(|usage| usage.total_tokens), Some(20));
    assert_eq!(observed.models, vec!["primary-model"]);
    assert_eq!(observed.auth_headers, vec!["Bearer test-openrouter-key"]);
    assert_eq!(observed.payloads[0]["user"], "session:test");
    assert!(observed.payloads[0].get("response_format").is_none());
}

#[tokio::test]
async fn transient_statuses_are_retried_on_the_same_model() {
    let provider = MockProvider::start(vec![
        ScriptedReply::provider_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
        ScriptedReply::provider_error(StatusCode::BAD_GATEWAY, "upstream_gateway"),
        ScriptedReply::completion("provider-model", json!("CHAT")),
    ])
    .await;

    let completion = provider
        .gateway(2)
        .complete(request(AgentCapability::Router, "hello"))
        .await
        .expect("request should succeed after retries");
    let observed = provider.finish().await;

    assert_eq!(completion.text, "CHAT");
    assert_eq!(
        observed.models,
        vec!["primary-model", "primary-model", "primary-model"]
    );
}

#[tokio::test]
async fn exhausted_primary_falls_back_to_secondary_model() {
    let provider = MockProvider::start(vec![
        ScriptedReply::provider_error(StatusCode::SERVICE_UNAVAILABLE, "capacity"),
        ScriptedReply::completion("fallback-provider-model", json!("CHAT")),
    ])
    .await;

    let completion = provider
        .gateway(0)
        .complete(request(AgentCapability::Router, "hello"))
        .await
        .expect("fallback should recover request");
    let observed = provider.finish().await;

    assert_eq!(completion.model, "fallback-provider-model");
    assert_eq!(observed.models, vec!["primary-model", "fallback-model"]);
}

#[tokio::test]
async fn unauthorized_fails_without_fallback() {
    let provider = MockProvider::start(vec![ScriptedReply::provider_error(
        StatusCode::UNAUTHORIZED,
        "invalid_api_key",
    )])
    .await;

    let err = provider
        .gateway(1)
        .complete(request(AgentCapability::Router, "hello"))
        .await
        .expect_err("unauthorized errors should fail immediately");
    let observed = provider.finish().await;

    assert!(
        matches!(err, LlmGatewayError::ProviderFailure(ref message) if message.contains("status=401") && message.contains("invalid_api_key")),
        "expected structured unauthorized provider error, got {err:?}"
    );
    assert_eq!(observed.models, vec!["primary-model"]);
}

#[tokio::test]
async fn blank_primary_content_falls_back() {
    let provider = MockProvider::start(vec![
        ScriptedReply::completion("primary-model", json!("   ")),
        ScriptedReply::completion("fallback-model", json!("ALLOW")),
    ])
    .await;

    let completion = provider
        .gateway(0)
        .complete(request(AgentCapability::SafetyClassifier, "lofts in denver"))
        .await
        .expect("fallback should recover empty primary payload");
    provider.finish().await;

    assert_eq!(completion.model, "fallback-model");
    assert_eq!(completion.text, "ALLOW");
}

#[tokio::test]
async fn classifier_calls_use_the_dedicated_model_when_configured() {
    let provider =
        MockProvider::start(vec![ScriptedReply::completion("classifier-model", json!("BLOCK"))])
            .await;

    let completion = provider
        .gateway_with(|config| config.classifier_model = Some("classifier-model".to_string()))
        .complete(request(AgentCapability::SafetyClassifier, "something odd"))
        .await
        .expect("classifier request should succeed");
    let observed = provider.finish().await;

    assert_eq!(completion.text, "BLOCK");
    assert_eq!(observed.models, vec!["classifier-model"]);
}

#[tokio::test]
async fn timeout_is_surfaced_without_retry_or_fallback() {
    let provider = MockProvider::start(vec![
        ScriptedReply::completion("primary-model", json!("CHAT"))
            .delayed(Duration::from_millis(800)),
    ])
    .await;

    let err = provider
        .gateway_with(|config| {
            config.max_retries = 2;
            config.timeout_ms = 100;
        })
        .complete(request(AgentCapability::Router, "hello"))
        .await
        .expect_err("slow provider should time out");
    let observed = provider.finish().await;

    assert_eq!(err, LlmGatewayError::Timeout);
    assert_eq!(observed.models, vec!["primary-model"]);
}

#[tokio::test]
async fn image_captions_route_to_vision_model_with_image_part() {
    let caption = json!({
        "style": "ranch",
        "exterior_material": "brick",
        "stories": 1,
        "features": ["attached garage"],
        "summary": "Single-story brick ranch."
    })
    .to_string();
    let provider = MockProvider::start(vec![ScriptedReply::completion(
        "vision-model",
        json!([{ "type": "text", "text": caption }]),
    )])
    .await;

    let request = ChatRequest::from_template(template_for_capability(AgentCapability::ImageCaption))
        .with_message(
            ChatMessage::user("Describe this home.").with_image("data:image/jpeg;base64,AAAA"),
        );
    let completion = provider
        .gateway(0)
        .complete(request)
        .await
        .expect("vision request should succeed");
    let observed = provider.finish().await;

    assert!(completion.text.contains("brick"));
    assert_eq!(observed.models, vec!["vision-model"]);
    assert_eq!(observed.payloads[0]["response_format"]["type"], "json_object");
    assert_eq!(
        observed.payloads[0]["messages"][1]["content"][1]["image_url"]["url"],
        "data:image/jpeg;base64,AAAA"
    );
}
