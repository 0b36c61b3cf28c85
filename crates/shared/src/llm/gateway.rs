use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::contracts::AgentCapability;
use super::prompts::PromptTemplate;
use crate::models::{ChatRole, ChatTurn};

pub type ChatModelFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatCompletion, LlmGatewayError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    /// `data:` URL of an attached image, for vision-capable models.
    pub image_data_url: Option<String>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            image_data_url: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
            image_data_url: None,
        }
    }

    pub fn with_image(mut self, data_url: impl Into<String>) -> Self {
        self.image_data_url = Some(data_url.into());
        self
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            role: turn.role,
            text: turn.text.clone(),
            image_data_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub capability: AgentCapability,
    pub requester_id: Option<String>,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
}

impl ChatRequest {
    pub fn from_template(template: PromptTemplate) -> Self {
        Self {
            capability: template.capability,
            requester_id: None,
            system_prompt: Some(template.system_prompt),
            messages: Vec::new(),
            response_format: if template.capability.expects_json() {
                ResponseFormat::JsonObject
            } else {
                ResponseFormat::Text
            },
        }
    }

    pub fn with_requester_id(mut self, requester_id: impl AsRef<str>) -> Self {
        let trimmed = requester_id.as_ref().trim();
        if !trimmed.is_empty() {
            self.requester_id = Some(trimmed.to_string());
        }
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    /// Text of the last user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::User)
            .map(|message| message.text.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmTokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub model: String,
    pub provider_request_id: Option<String>,
    pub text: String,
    pub usage: Option<LlmTokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmGatewayError {
    #[error("llm provider request timed out")]
    Timeout,
    #[error("llm provider request failed: {0}")]
    ProviderFailure(String),
    #[error("llm provider returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
}

pub trait ChatModel: Send + Sync {
    fn complete<'a>(&'a self, request: ChatRequest) -> ChatModelFuture<'a>;
}
