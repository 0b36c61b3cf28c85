use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::guardrails::GuardrailChain;
use shared::listing_store::ListingStore;
use shared::llm::{ChatModel, EmbeddingModel};
use shared::media::ObjectStore;
use shared::memory::{ChatMemoryStore, InMemoryChatMemoryStore};
use shared::models::{ChatTurn, ImageSearchHints, Listing};
use shared::rate_limit::RateLimitWindow;
use shared::search::FilterSpec;
use shared::session::{SessionKey, resolve_session_key};
use shared::single_flight::{FlightRole, SingleFlight};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{PipelineError, RuntimeBuildError};
use crate::observer::{Observers, PipelineObserver, PipelineStage, TracingObserver};

mod chat;
mod extraction;
mod image_search;
mod media;
mod router;
mod search;
mod synthesis;

pub use image_search::{ImageSearchReply, ImageUpload};
pub use media::{ListingMedia, MediaUrlResolver};
pub use router::Route;

const MAX_IMAGE_SEARCH_K: usize = 100;

/// Transport-level identity of one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_header: Option<String>,
    pub identity: Option<String>,
    pub transport_session: Option<String>,
}

impl RequestContext {
    pub fn with_session_header(session_id: impl Into<String>) -> Self {
        Self {
            session_header: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// A missing transport session is created here, and only here.
    pub fn session_key(&self) -> SessionKey {
        resolve_session_key(
            self.session_header.as_deref(),
            self.identity.as_deref(),
            || {
                self.transport_session
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string())
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssistantReply {
    Chat {
        reply: String,
    },
    Search {
        reply: String,
        filter: FilterSpec,
        listings: Vec<Listing>,
        media: Vec<ListingMedia>,
    },
}

impl AssistantReply {
    pub fn route(&self) -> Route {
        match self {
            Self::Chat { .. } => Route::Chat,
            Self::Search { .. } => Route::Search,
        }
    }

    pub fn reply(&self) -> &str {
        match self {
            Self::Chat { reply } | Self::Search { reply, .. } => reply,
        }
    }

    pub fn listings(&self) -> &[Listing] {
        match self {
            Self::Chat { .. } => &[],
            Self::Search { listings, .. } => listings,
        }
    }
}

#[derive(Debug)]
struct SearchOutcome {
    filter: FilterSpec,
    listings: Vec<Listing>,
    explanation: String,
    media: Vec<ListingMedia>,
}

/// What one deduplicated generation produces. A chat outcome carries no reply: each
/// caller converses over its own session memory.
#[derive(Debug, Clone)]
enum RoutedOutcome {
    Chat,
    Search(Arc<SearchOutcome>),
}

struct Pipeline {
    config: RuntimeConfig,
    chat_model: Arc<dyn ChatModel>,
    embedding_model: Arc<dyn EmbeddingModel>,
    listing_store: Arc<dyn ListingStore>,
    memory: Arc<dyn ChatMemoryStore>,
    guardrails: GuardrailChain,
    observers: Observers,
    media: MediaUrlResolver,
}

pub struct AssistantRuntime {
    pipeline: Arc<Pipeline>,
    routed_flights: SingleFlight<RoutedOutcome, PipelineError>,
}

impl AssistantRuntime {
    pub fn builder(config: RuntimeConfig) -> AssistantRuntimeBuilder {
        AssistantRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.pipeline.config
    }

    /// Number of text requests currently being computed on behalf of waiters.
    pub fn in_flight_requests(&self) -> usize {
        self.routed_flights.in_flight_count()
    }

    /// Guards, routes and answers one utterance. Concurrent identical utterances share
    /// one routing decision and, for searches, one search result.
    pub async fn handle(
        &self,
        context: &RequestContext,
        text: &str,
    ) -> Result<AssistantReply, PipelineError> {
        let session_key = context.session_key();
        let orchestrator_started = Instant::now();
        let result = self.handle_for_session(&session_key, text).await;
        let total_orchestrator_ms = orchestrator_started.elapsed().as_millis() as u64;

        match &result {
            Ok((reply, role)) => info!(
                session_key = session_key.as_str(),
                route = reply.route().as_str(),
                shared_flight = *role == FlightRole::Follower,
                listings = reply.listings().len(),
                total_orchestrator_ms,
                "assistant orchestrator latency breakdown"
            ),
            Err(err) => warn!(
                session_key = session_key.as_str(),
                stage = err.stage().map(PipelineStage::as_str).unwrap_or("unknown"),
                retryable = err.is_retryable(),
                total_orchestrator_ms,
                "assistant orchestrator failed: {err}"
            ),
        }

        result.map(|(reply, _)| reply)
    }

    async fn handle_for_session(
        &self,
        session_key: &SessionKey,
        text: &str,
    ) -> Result<(AssistantReply, FlightRole), PipelineError> {
        let pipeline = self.pipeline.as_ref();
        let requester_id = session_key.as_str();

        pipeline
            .observers
            .observe(requester_id, PipelineStage::InputGuardrails, async {
                pipeline
                    .guardrails
                    .check_input(session_key, text)
                    .await
                    .map_err(PipelineError::from_input_guardrail)
            })
            .await?;

        let supplier = {
            let pipeline = Arc::clone(&self.pipeline);
            let requester_id = requester_id.to_string();
            let text = text.to_string();
            move || async move { route_and_search(&pipeline, &requester_id, &text).await }
        };
        let (role, outcome) = self.routed_flights.join(&dedup_key(text), supplier).await;
        let outcome =
            outcome.map_err(|err| PipelineError::from_flight(PipelineStage::Routing, err))?;

        let reply = match outcome {
            RoutedOutcome::Chat => {
                let reply = pipeline
                    .observers
                    .observe(
                        requester_id,
                        PipelineStage::Conversation,
                        chat::converse(pipeline, session_key, text),
                    )
                    .await?;
                AssistantReply::Chat { reply }
            }
            RoutedOutcome::Search(search) => AssistantReply::Search {
                reply: search.explanation.clone(),
                filter: search.filter.clone(),
                listings: search.listings.clone(),
                media: search.media.clone(),
            },
        };

        self.remember(session_key, text, reply.reply()).await;
        Ok((reply, role))
    }

    /// Captions the photo, embeds the caption (with hints) and returns the nearest
    /// listings. `k` defaults to the configured value when absent or zero.
    pub async fn handle_image(
        &self,
        upload: ImageUpload,
        k: Option<usize>,
        hints: ImageSearchHints,
    ) -> Result<ImageSearchReply, PipelineError> {
        let request_id = format!("image:{}", Uuid::new_v4());
        let started = Instant::now();
        let result = self.search_by_image(&request_id, upload, k, &hints).await;
        let total_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(reply) => info!(
                request_id = request_id.as_str(),
                results = reply.listings.len(),
                total_ms,
                "image search finished"
            ),
            Err(err) => warn!(
                request_id = request_id.as_str(),
                stage = err.stage().map(PipelineStage::as_str).unwrap_or("unknown"),
                total_ms,
                "image search failed: {err}"
            ),
        }
        result
    }

    async fn search_by_image(
        &self,
        request_id: &str,
        upload: ImageUpload,
        k: Option<usize>,
        hints: &ImageSearchHints,
    ) -> Result<ImageSearchReply, PipelineError> {
        let pipeline = self.pipeline.as_ref();
        let max_dimension = pipeline.config.image_max_dimension;
        let k = k
            .filter(|k| *k > 0)
            .unwrap_or(pipeline.config.image_search_default_k)
            .min(MAX_IMAGE_SEARCH_K);

        let prepared = pipeline
            .observers
            .observe(request_id, PipelineStage::ImageValidation, async move {
                tokio::task::spawn_blocking(move || {
                    image_search::prepare_image(&upload, max_dimension)
                })
                .await
                .map_err(|err| PipelineError::InvalidImage(format!("image preparation aborted: {err}")))?
            })
            .await?;
        debug!(
            request_id,
            downscaled = prepared.downscaled,
            bytes = prepared.bytes.len(),
            "image prepared for captioning"
        );

        let caption = pipeline
            .observers
            .observe(
                request_id,
                PipelineStage::ImageCaption,
                image_search::caption_image(pipeline, request_id, &prepared),
            )
            .await?;

        let embedding_text = image_search::embedding_input(&caption, hints);
        let vector = pipeline
            .observers
            .observe(
                request_id,
                PipelineStage::Embedding,
                image_search::embed_caption(pipeline, request_id, &embedding_text),
            )
            .await?;

        let filters = image_search::vector_filters(hints);
        let listings = pipeline
            .observers
            .observe(
                request_id,
                PipelineStage::VectorSearch,
                image_search::nearest_listings(pipeline, &vector, k, &filters),
            )
            .await?;

        let media = pipeline
            .observers
            .observe(
                request_id,
                PipelineStage::MediaPresign,
                pipeline.media.media_for(&listings),
            )
            .await?;

        Ok(ImageSearchReply {
            caption,
            vector,
            listings,
            media,
        })
    }

    async fn remember(&self, session_key: &SessionKey, text: &str, reply: &str) {
        let now = Utc::now();
        for turn in [ChatTurn::user(text, now), ChatTurn::assistant(reply, now)] {
            if let Err(err) = self.pipeline.memory.append(session_key, turn).await {
                warn!(
                    session_key = session_key.as_str(),
                    "failed to persist chat turn: {err}"
                );
                break;
            }
        }
    }
}

async fn route_and_search(
    pipeline: &Pipeline,
    requester_id: &str,
    text: &str,
) -> Result<RoutedOutcome, PipelineError> {
    let observers = &pipeline.observers;
    let route = observers
        .observe(
            requester_id,
            PipelineStage::Routing,
            router::classify(pipeline, requester_id, text),
        )
        .await?;
    if route == Route::Chat {
        return Ok(RoutedOutcome::Chat);
    }

    let filter = observers
        .observe(
            requester_id,
            PipelineStage::Extraction,
            extraction::extract_filter(pipeline, requester_id, text),
        )
        .await?;
    let listings = observers
        .observe(
            requester_id,
            PipelineStage::Query,
            search::query_listings(pipeline, requester_id, &filter),
        )
        .await?;
    let explanation = observers
        .observe(
            requester_id,
            PipelineStage::Synthesis,
            synthesis::explain_results(pipeline, requester_id, &filter, &listings),
        )
        .await?;
    let media = observers
        .observe(
            requester_id,
            PipelineStage::MediaPresign,
            pipeline.media.media_for(&listings),
        )
        .await?;

    Ok(RoutedOutcome::Search(Arc::new(SearchOutcome {
        filter,
        listings,
        explanation,
        media,
    })))
}

/// Requests that differ only in case or whitespace share a key.
pub(crate) fn dedup_key(text: &str) -> String {
    let canonical = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

pub struct AssistantRuntimeBuilder {
    config: RuntimeConfig,
    chat_model: Option<Arc<dyn ChatModel>>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
    listing_store: Option<Arc<dyn ListingStore>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    memory: Option<Arc<dyn ChatMemoryStore>>,
    rate_limits: Option<Arc<RateLimitWindow>>,
    guardrails: Option<GuardrailChain>,
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl AssistantRuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            chat_model: None,
            embedding_model: None,
            listing_store: None,
            object_store: None,
            memory: None,
            rate_limits: None,
            guardrails: None,
            observers: vec![Arc::new(TracingObserver)],
        }
    }

    pub fn chat_model(mut self, chat_model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(chat_model);
        self
    }

    pub fn embedding_model(mut self, embedding_model: Arc<dyn EmbeddingModel>) -> Self {
        self.embedding_model = Some(embedding_model);
        self
    }

    pub fn listing_store(mut self, listing_store: Arc<dyn ListingStore>) -> Self {
        self.listing_store = Some(listing_store);
        self
    }

    pub fn object_store(mut self, object_store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(object_store);
        self
    }

    /// Defaults to an in-process store bounded by `chat_memory_max_turns`.
    pub fn memory(mut self, memory: Arc<dyn ChatMemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn rate_limits(mut self, rate_limits: Arc<RateLimitWindow>) -> Self {
        self.rate_limits = Some(rate_limits);
        self
    }

    /// Replaces the standard chain. The rate window set here is then unused.
    pub fn guardrails(mut self, guardrails: GuardrailChain) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replaces every observer, including the default tracing one.
    pub fn observers(mut self, observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        self.observers = observers;
        self
    }

    pub fn build(self) -> Result<AssistantRuntime, RuntimeBuildError> {
        self.config.validate()?;
        let chat_model = self
            .chat_model
            .ok_or(RuntimeBuildError::MissingCollaborator("chat_model"))?;
        let embedding_model = self
            .embedding_model
            .ok_or(RuntimeBuildError::MissingCollaborator("embedding_model"))?;
        let listing_store = self
            .listing_store
            .ok_or(RuntimeBuildError::MissingCollaborator("listing_store"))?;
        let object_store = self
            .object_store
            .ok_or(RuntimeBuildError::MissingCollaborator("object_store"))?;

        let guardrails = match self.guardrails {
            Some(guardrails) => guardrails,
            None => {
                let rate_limits = match self.rate_limits {
                    Some(rate_limits) => rate_limits,
                    None => Arc::new(RateLimitWindow::new(self.config.rate_limits.clone())?),
                };
                GuardrailChain::standard(
                    &self.config.guardrails,
                    rate_limits,
                    Arc::clone(&chat_model),
                    self.config.model_timeout(),
                )
            }
        };
        let memory = self.memory.unwrap_or_else(|| {
            Arc::new(InMemoryChatMemoryStore::new(
                self.config.chat_memory_max_turns,
            ))
        });
        let media = MediaUrlResolver::new(
            object_store,
            self.config.media_presign_ttl(),
            self.config.media_max_urls_per_listing,
        );
        let observers = Observers::new(self.observers);

        info!(
            input_guardrails = ?guardrails.input_names(),
            output_guardrails = ?guardrails.output_names(),
            observers = observers.len(),
            "assistant runtime assembled"
        );

        Ok(AssistantRuntime {
            pipeline: Arc::new(Pipeline {
                config: self.config,
                chat_model,
                embedding_model,
                listing_store,
                memory,
                guardrails,
                observers,
                media,
            }),
            routed_flights: SingleFlight::new(),
        })
    }
}
