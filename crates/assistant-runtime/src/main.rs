use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assistant_runtime::{AssistantRuntime, ImageUpload, PipelineError, RequestContext, RuntimeConfig};
use serde::Serialize;
use serde_json::json;
use shared::listing_store::{InMemoryListingStore, ListingStore};
use shared::llm::{EmbeddingConfig, HttpEmbeddingModel, OpenRouterGateway, OpenRouterGatewayConfig};
use shared::media::SignedUrlPresigner;
use shared::memory::{ChatMemoryStore, InMemoryChatMemoryStore, RedisChatMemoryStore};
use shared::models::ImageSearchHints;
use shared::rate_limit::RateLimitWindow;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const IMAGE_COMMAND_PREFIX: &str = "/image ";

#[tokio::main]
async fn main() {
    if let Err(err) = shared::config::load_dotenv() {
        eprintln!("{err}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "assistant_runtime=info,shared=info".to_string()),
        )
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_writer(std::io::stderr)
        .init();

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load assistant runtime config");
            std::process::exit(1);
        }
    };

    let chat_model = match OpenRouterGatewayConfig::from_env().and_then(OpenRouterGateway::new) {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!(error = %err, "failed to initialize model gateway");
            std::process::exit(1);
        }
    };

    let embedding_model = match EmbeddingConfig::from_env().and_then(HttpEmbeddingModel::new) {
        Ok(model) => Arc::new(model),
        Err(err) => {
            error!(error = %err, "failed to initialize embedding client");
            std::process::exit(1);
        }
    };

    let listing_store: Arc<dyn ListingStore> = match &config.listings_path {
        Some(path) => match InMemoryListingStore::from_json_file(path).await {
            Ok(store) => {
                info!(listings = store.len(), path = %path.display(), "loaded listing catalog");
                Arc::new(store)
            }
            Err(err) => {
                error!(error = %err, path = %path.display(), "failed to load listing catalog");
                std::process::exit(1);
            }
        },
        None => {
            warn!("LISTINGS_PATH is not set; searching an empty catalog");
            Arc::new(InMemoryListingStore::new(Vec::new()))
        }
    };

    let Some(signing_secret) = config.media_signing_secret.clone() else {
        error!("MEDIA_SIGNING_SECRET is required to presign listing media");
        std::process::exit(1);
    };
    let object_store = match SignedUrlPresigner::new(&config.media_base_url, signing_secret) {
        Ok(presigner) => Arc::new(presigner),
        Err(err) => {
            error!(error = %err, "failed to initialize media presigner");
            std::process::exit(1);
        }
    };

    let mut memory_pruner = None;
    let memory: Arc<dyn ChatMemoryStore> = match &config.redis_url {
        Some(redis_url) => {
            match RedisChatMemoryStore::new(redis_url, config.chat_memory_max_turns).await {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    error!(error = %err, "failed to connect chat memory to redis");
                    std::process::exit(1);
                }
            }
        }
        None => {
            let store = Arc::new(InMemoryChatMemoryStore::new(config.chat_memory_max_turns));
            memory_pruner = Some(store.spawn_pruner(MAINTENANCE_INTERVAL));
            store
        }
    };

    let rate_limits = match RateLimitWindow::new(config.rate_limits.clone()) {
        Ok(window) => Arc::new(window),
        Err(err) => {
            error!(error = %err, "invalid rate limit configuration");
            std::process::exit(1);
        }
    };
    let pruner = rate_limits.spawn_pruner(MAINTENANCE_INTERVAL);

    let runtime = match AssistantRuntime::builder(config)
        .chat_model(chat_model)
        .embedding_model(embedding_model)
        .listing_store(listing_store)
        .object_store(object_store)
        .memory(memory)
        .rate_limits(rate_limits)
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to assemble assistant runtime");
            std::process::exit(1);
        }
    };

    let context = match std::env::var("ASSISTANT_SESSION_ID") {
        Ok(session_id) => RequestContext::with_session_header(session_id),
        Err(_) => RequestContext {
            transport_session: Some(Uuid::new_v4().to_string()),
            ..RequestContext::default()
        },
    };
    info!("assistant runtime ready; reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "failed to read request line");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let rendered = match line.strip_prefix(IMAGE_COMMAND_PREFIX) {
            Some(arguments) => render(search_image_file(&runtime, arguments).await),
            None => render(runtime.handle(&context, line).await),
        };
        if let Err(err) = write_line(&mut stdout, &rendered).await {
            error!(error = %err, "failed to write reply");
            break;
        }
    }

    pruner.abort();
    if let Some(memory_pruner) = memory_pruner {
        memory_pruner.abort();
    }
}

/// `<path> [hints-json]`
async fn search_image_file(
    runtime: &AssistantRuntime,
    arguments: &str,
) -> Result<assistant_runtime::ImageSearchReply, PipelineError> {
    let (path, hints) = match arguments.trim().split_once(' ') {
        Some((path, hints)) => (path, hints.trim()),
        None => (arguments.trim(), ""),
    };
    let hints = if hints.is_empty() {
        ImageSearchHints::default()
    } else {
        serde_json::from_str(hints)
            .map_err(|err| PipelineError::InvalidImage(format!("invalid search hints: {err}")))?
    };
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| PipelineError::InvalidImage(format!("failed to read {path}: {err}")))?;

    runtime
        .handle_image(
            ImageUpload {
                bytes,
                mime: mime_for_path(Path::new(path)).to_string(),
            },
            None,
            hints,
        )
        .await
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn render<T: Serialize>(result: Result<T, PipelineError>) -> String {
    let value = match result {
        Ok(reply) => serde_json::to_value(reply)
            .unwrap_or_else(|err| json!({ "error": format!("failed to encode reply: {err}") })),
        Err(err) => json!({
            "error": err.to_string(),
            "stage": err.stage().map(|stage| stage.as_str()),
            "retryable": err.is_retryable(),
        }),
    };
    value.to_string()
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
