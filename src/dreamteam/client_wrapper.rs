//! A ClientWrapper is a wrapper around a specific chat-completion deployment.
//! It provides a common interface to interact with the model.
//! It does not keep track of the conversation, for that we use an LLMSession
//! which keeps the history and uses a ClientWrapper to talk to the model.

use async_trait::async_trait;
use std::error::Error;
use std::sync::Mutex;

/// Represents the possible roles for a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    // set by the developer to steer the model's responses
    System,
    // a message sent by a human user, or by another team member
    User,
    // content generated by the model
    Assistant,
}

impl Role {
    /// Wire name used by chat-completion endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Represents a generic message to be sent to a model.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Trait defining the interface to interact with a chat-completion service.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send the messages to the model and get the assistant's reply.
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Model or deployment name, used in logs.
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the *last* send_message() call.
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    /// Wrappers tracking usage return their slot here.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
