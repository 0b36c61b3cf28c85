mod support;

use std::sync::Arc;

use assistant_runtime::{AssistantReply, AssistantRuntime, RequestContext, Route};
use shared::listing_store::InMemoryListingStore;
use shared::llm::AgentCapability;
use shared::media::SignedUrlPresigner;
use shared::memory::{ChatMemoryStore, InMemoryChatMemoryStore};
use shared::models::ChatRole;
use shared::session::SessionKey;

use support::{StubChatModel, StubEmbeddingModel, fixture_listings, harness, test_config};

#[tokio::test]
async fn conversation_carries_session_history() {
    let harness = harness(StubChatModel::new());
    let alice = RequestContext::with_session_header("alice");

    let first = harness
        .runtime
        .handle(&alice, "hello")
        .await
        .expect("chat should succeed");
    assert_eq!(
        first,
        AssistantReply::Chat {
            reply: "Happy to help. turns seen: 1".to_string()
        }
    );

    let second = harness
        .runtime
        .handle(&alice, "what can you do")
        .await
        .expect("chat should succeed");
    assert_eq!(second.reply(), "Happy to help. turns seen: 3");

    let conversation = harness.model.requests_for(AgentCapability::Conversation);
    let history = &conversation[1].messages;
    assert_eq!(history[0].role, ChatRole::User);
    assert_eq!(history[0].text, "hello");
    assert_eq!(history[1].role, ChatRole::Assistant);
    assert_eq!(history[2].text, "what can you do");

    let bob = harness
        .runtime
        .handle(&RequestContext::with_session_header("bob"), "what can you do")
        .await
        .expect("chat should succeed");
    assert_eq!(bob.reply(), "Happy to help. turns seen: 1");
}

#[tokio::test]
async fn identity_keys_memory_when_no_session_header_is_sent() {
    let memory = Arc::new(InMemoryChatMemoryStore::new(10));
    let model = Arc::new(StubChatModel::new());
    let runtime = AssistantRuntime::builder(test_config())
        .chat_model(model.clone())
        .embedding_model(Arc::new(StubEmbeddingModel::default()))
        .listing_store(Arc::new(InMemoryListingStore::new(fixture_listings())))
        .object_store(Arc::new(
            SignedUrlPresigner::new("https://media.test/listing-media", "test-secret")
                .expect("presigner should build"),
        ))
        .memory(memory.clone())
        .build()
        .expect("runtime should build");

    let context = RequestContext {
        identity: Some("carol".to_string()),
        ..RequestContext::default()
    };
    let reply = runtime
        .handle(&context, "3 bed homes in Austin")
        .await
        .expect("search should succeed");
    assert_eq!(reply.route(), Route::Search);

    let turns = memory
        .recent(&SessionKey::from("user:carol"), 10)
        .await
        .expect("memory read");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].text, "3 bed homes in Austin");
    assert_eq!(turns[1].text, reply.reply());
}

#[tokio::test]
async fn memory_is_bounded_to_recent_turns() {
    let mut config = test_config();
    config.chat_memory_max_turns = 4;
    config.chat_context_window_turns = 4;
    let harness = support::harness_with_config(StubChatModel::new(), config);
    let dave = RequestContext::with_session_header("dave");

    for text in ["hello", "tell me a joke", "another one", "thanks"] {
        harness
            .runtime
            .handle(&dave, text)
            .await
            .expect("chat should succeed");
    }

    let conversation = harness.model.requests_for(AgentCapability::Conversation);
    let last = conversation.last().expect("conversation request");
    assert_eq!(last.messages.len(), 5);
    assert_eq!(last.messages[0].text, "tell me a joke");
}
