//! The `llm_session` module keeps one team member's private view of the conversation:
//! its system prompt, the messages it has seen, and real token accounting.
//!
//! **Key features:**
//! - **Automatic context trimming**: never exceed your `max_tokens` window.
//! - **Token tracking**: records `input_tokens` & `output_tokens` of the latest call.
//! - **Reset**: [`LLMSession::clear_history`] drops everything but the system prompt, which
//!   the orchestrator does to every member after re-planning.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dreamteam::client_wrapper::Role;
//! use dreamteam::clients::azure_openai::AzureOpenAIClient;
//! use dreamteam::{DreamTeamConfig, LLMSession};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = Arc::new(AzureOpenAIClient::from_config(&DreamTeamConfig::from_env())?);
//! let mut session = LLMSession::new(client, "You are a careful analyst.".into(), 8_192);
//! let reply = session.send_message(Role::User, "Summarise the plan.".into()).await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

use crate::dreamteam::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use std::error::Error;
use std::sync::Arc;

pub struct LLMSession {
    client: Arc<dyn ClientWrapper>,
    system_prompt: Message,
    conversation_history: Vec<Message>,
    max_tokens: usize,
    total_input_tokens: usize,
    total_output_tokens: usize,
    total_token_count: usize,
}

impl LLMSession {
    /// Creates a new `LLMSession` with the given client and system prompt.
    pub fn new(client: Arc<dyn ClientWrapper>, system_prompt: String, max_tokens: usize) -> Self {
        LLMSession {
            client,
            system_prompt: Message::new(Role::System, system_prompt),
            conversation_history: Vec::new(),
            max_tokens,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_token_count: 0,
        }
    }

    /// Append a message without calling the model.
    pub fn receive_message(&mut self, role: Role, content: String) {
        self.conversation_history.push(Message::new(role, content));
    }

    /// Appends a message, then calls [`complete`](LLMSession::complete).
    pub async fn send_message(
        &mut self,
        role: Role,
        content: String,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.receive_message(role, content);
        self.complete().await
    }

    /// Sends system prompt + history to the model, records usage, trims the oldest messages
    /// when the reported total exceeds `max_tokens`, and appends the reply.
    pub async fn complete(&mut self) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let mut messages = Vec::with_capacity(self.conversation_history.len() + 1);
        messages.push(self.system_prompt.clone());
        messages.extend(self.conversation_history.iter().cloned());

        let response = self.client.send_message(&messages).await?;

        if let Some(usage) = self.client.get_last_usage() {
            self.total_input_tokens = usage.input_tokens;
            self.total_output_tokens = usage.output_tokens;
            self.total_token_count = usage.total_tokens;

            if self.total_token_count > self.max_tokens {
                let mut excess = self.total_token_count - self.max_tokens;
                while excess > 0 && !self.conversation_history.is_empty() {
                    let msg = self.conversation_history.remove(0);
                    excess = excess.saturating_sub(estimate_message_token_count(&msg));
                }
            }
        }

        self.conversation_history.push(response.clone());
        Ok(response)
    }

    /// Sets a new system prompt for the session.
    pub fn set_system_prompt(&mut self, prompt: String) {
        self.system_prompt = Message::new(Role::System, prompt);
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt.content
    }

    /// Forget everything said so far; the system prompt stays.
    pub fn clear_history(&mut self) {
        self.conversation_history.clear();
    }

    pub fn history(&self) -> &[Message] {
        &self.conversation_history
    }

    /// Returns the token usage reported by the latest call.
    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.total_input_tokens,
            output_tokens: self.total_output_tokens,
            total_tokens: self.total_token_count,
        }
    }

    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }

    pub fn get_max_tokens(&self) -> usize {
        self.max_tokens
    }
}

/// Approximation: one token per 4 characters.
fn estimate_token_count(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Estimates the number of tokens in a Message, including role annotations.
fn estimate_message_token_count(message: &Message) -> usize {
    1 + estimate_token_count(&message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct UsageClient {
        usage: Mutex<Option<TokenUsage>>,
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ClientWrapper for UsageClient {
        async fn send_message(
            &self,
            messages: &[Message],
        ) -> Result<Message, Box<dyn Error + Send + Sync>> {
            self.seen.lock().unwrap().push(messages.len());
            *self.usage.lock().unwrap() = Some(TokenUsage {
                input_tokens: 90,
                output_tokens: 20,
                total_tokens: 110,
            });
            Ok(Message::new(Role::Assistant, "ok"))
        }

        fn model_name(&self) -> &str {
            "usage-mock"
        }

        fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
            Some(&self.usage)
        }
    }

    #[tokio::test]
    async fn test_system_prompt_is_sent_but_not_stored() {
        let client = Arc::new(UsageClient {
            usage: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let mut session = LLMSession::new(client.clone(), "system".into(), 10_000);
        session
            .send_message(Role::User, "hello".into())
            .await
            .unwrap();

        assert_eq!(client.seen.lock().unwrap()[0], 2);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.token_usage().total_tokens, 110);
    }

    #[tokio::test]
    async fn test_history_is_trimmed_past_max_tokens() {
        let client = Arc::new(UsageClient {
            usage: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let mut session = LLMSession::new(client, "system".into(), 100);
        session.receive_message(Role::User, "a".repeat(400));
        session
            .send_message(Role::User, "question".into())
            .await
            .unwrap();

        // 10 tokens over budget drops the oldest long message only
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].content, "question");

        session.clear_history();
        assert!(session.history().is_empty());
        assert_eq!(session.system_prompt(), "system");
    }
}
