#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assistant_runtime::{AssistantRuntime, RuntimeConfig};
use serde_json::{Value, json};
use shared::listing_store::InMemoryListingStore;
use shared::llm::{
    AgentCapability, ChatCompletion, ChatModel, ChatModelFuture, ChatRequest, EmbeddingFuture,
    EmbeddingModel, LlmGatewayError,
};
use shared::media::SignedUrlPresigner;
use shared::models::Listing;

pub type Responder =
    dyn Fn(&ChatRequest, usize) -> Result<String, LlmGatewayError> + Send + Sync;

/// Chat model double that answers per capability and counts every call. The responder
/// receives the zero-based index of the call within its capability.
pub struct StubChatModel {
    respond: Box<Responder>,
    delays: HashMap<AgentCapability, Vec<Duration>>,
    calls: Mutex<HashMap<AgentCapability, usize>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl StubChatModel {
    pub fn new() -> Self {
        Self::with_responder(|request, _| default_reply(request))
    }

    pub fn with_responder<F>(respond: F) -> Self
    where
        F: Fn(&ChatRequest, usize) -> Result<String, LlmGatewayError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            delays: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Delays calls of `capability`; the last entry applies to every later call.
    pub fn with_delays(mut self, capability: AgentCapability, delays: Vec<Duration>) -> Self {
        self.delays.insert(capability, delays);
        self
    }

    pub fn calls(&self, capability: AgentCapability) -> usize {
        self.calls
            .lock()
            .expect("call counter lock")
            .get(&capability)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("call counter lock").values().sum()
    }

    pub fn requests_for(&self, capability: AgentCapability) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .expect("request log lock")
            .iter()
            .filter(|request| request.capability == capability)
            .cloned()
            .collect()
    }

    fn delay_for(&self, capability: AgentCapability, index: usize) -> Duration {
        self.delays
            .get(&capability)
            .and_then(|delays| delays.get(index).or_else(|| delays.last()))
            .copied()
            .unwrap_or_default()
    }
}

impl ChatModel for StubChatModel {
    fn complete<'a>(&'a self, request: ChatRequest) -> ChatModelFuture<'a> {
        Box::pin(async move {
            let index = {
                let mut calls = self.calls.lock().expect("call counter lock");
                let count = calls.entry(request.capability).or_insert(0);
                *count += 1;
                *count - 1
            };
            self.requests
                .lock()
                .expect("request log lock")
                .push(request.clone());

            let delay = self.delay_for(request.capability, index);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let text = (self.respond)(&request, index)?;
            Ok(ChatCompletion {
                model: "stub/model".to_string(),
                provider_request_id: None,
                text,
                usage: None,
            })
        })
    }
}

pub fn last_user_text(request: &ChatRequest) -> &str {
    request
        .messages
        .last()
        .map(|message| message.text.as_str())
        .unwrap_or_default()
}

/// Well-behaved agent replies: every request is allowed, anything mentioning bedrooms
/// or homes is a search, and synthesis echoes the ids it was given.
pub fn default_reply(request: &ChatRequest) -> Result<String, LlmGatewayError> {
    let text = last_user_text(request);
    let reply = match request.capability {
        AgentCapability::SafetyClassifier => "ALLOW".to_string(),
        AgentCapability::Router => {
            let lowered = text.to_lowercase();
            if ["bed", "home", "condo", "house", "listing"]
                .iter()
                .any(|word| lowered.contains(word))
            {
                "SEARCH".to_string()
            } else {
                "CHAT".to_string()
            }
        }
        AgentCapability::FilterExtraction => extraction_reply(text).to_string(),
        AgentCapability::SearchSynthesis => {
            let ids = synthesis_input_ids(text);
            json!({
                "listing_ids": ids,
                "explanation": format!("Found {} matching homes.", ids.len()),
            })
            .to_string()
        }
        AgentCapability::Conversation => {
            format!("Happy to help. turns seen: {}", request.messages.len())
        }
        AgentCapability::ImageCaption => json!({
            "style": "craftsman",
            "exterior_material": "brick",
            "stories": 2,
            "property_type": "house",
            "features": ["porch", "garage"],
            "condition": "well kept",
            "summary": "Two-story brick craftsman house with a covered porch.",
        })
        .to_string(),
    };
    Ok(reply)
}

fn extraction_reply(text: &str) -> Value {
    let lowered = text.to_lowercase();
    if lowered.contains("everything") {
        return json!({});
    }

    let mut filter = serde_json::Map::new();
    if lowered.contains("austin") {
        filter.insert("city".to_string(), json!(["Austin"]));
    }
    if lowered.contains("3 bed") {
        filter.insert("min_beds".to_string(), json!(3));
    }
    if lowered.contains("under 500k") {
        filter.insert("max_price".to_string(), json!(500000));
    }
    Value::Object(filter)
}

pub fn synthesis_input_ids(text: &str) -> Vec<String> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|payload| payload.get("listings").cloned())
        .and_then(|listings| listings.as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|listing| listing.get("id").and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// Embeds brick descriptions near the brick fixtures and everything else near the rest.
#[derive(Default)]
pub struct StubEmbeddingModel {
    pub calls: AtomicUsize,
    pub inputs: Mutex<Vec<String>>,
}

impl EmbeddingModel for StubEmbeddingModel {
    fn embed<'a>(&'a self, text: &'a str) -> EmbeddingFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs
                .lock()
                .expect("embedding input lock")
                .push(text.to_string());
            if text.to_lowercase().contains("brick") {
                Ok(vec![1.0, 0.1, 0.0])
            } else {
                Ok(vec![0.0, 1.0, 0.1])
            }
        })
    }
}

pub fn listing(
    id: &str,
    city: &str,
    property_type: &str,
    beds: f64,
    price: f64,
    embedding: [f32; 3],
) -> Listing {
    serde_json::from_value(json!({
        "id": id,
        "title": format!("{beds} bed {property_type} in {city}"),
        "description": format!("A {property_type} listing used in tests."),
        "city": city,
        "state": "TX",
        "property_type": property_type,
        "price": price,
        "beds": beds,
        "baths": 2.0,
        "image_keys": [format!("listings/{id}/front.jpg"), format!("listings/{id}/kitchen.jpg")],
        "embedding": embedding,
    }))
    .expect("listing fixture should deserialize")
}

pub fn fixture_listings() -> Vec<Listing> {
    vec![
        listing("atx-1", "Austin", "house", 3.0, 450_000.0, [0.9, 0.2, 0.0]),
        listing("atx-2", "Austin", "condo", 2.0, 320_000.0, [0.1, 0.9, 0.2]),
        listing("atx-3", "Austin", "house", 4.0, 610_000.0, [1.0, 0.0, 0.1]),
        listing("dal-1", "Dallas", "house", 3.0, 380_000.0, [0.95, 0.1, 0.0]),
    ]
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        model_timeout_ms: 2_000,
        ..RuntimeConfig::default()
    }
}

pub struct Harness {
    pub runtime: AssistantRuntime,
    pub model: Arc<StubChatModel>,
    pub embeddings: Arc<StubEmbeddingModel>,
}

pub fn harness(model: StubChatModel) -> Harness {
    harness_with_config(model, test_config())
}

pub fn harness_with_config(model: StubChatModel, config: RuntimeConfig) -> Harness {
    let model = Arc::new(model);
    let embeddings = Arc::new(StubEmbeddingModel::default());
    let presigner = SignedUrlPresigner::new("https://media.test/listing-media", "test-secret")
        .expect("presigner should build");

    let runtime = AssistantRuntime::builder(config)
        .chat_model(model.clone())
        .embedding_model(embeddings.clone())
        .listing_store(Arc::new(InMemoryListingStore::new(fixture_listings())))
        .object_store(Arc::new(presigner))
        .build()
        .expect("runtime should build");

    Harness {
        runtime,
        model,
        embeddings,
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("png fixture should encode");
    bytes.into_inner()
}
