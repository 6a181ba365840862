use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::types::{EvaluationScores, PolicyAction};

/// Conversation role in the canonical request shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in the conversation, oldest-first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Canonical model invocation request (OpenAI-shaped).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl LlmRequest {
    /// Validate the request invariants: at least one user message,
    /// temperature in [0,2], max_tokens positive.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.is_empty() {
            return Err(GatewayError::BadRequest("model is required".into()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::BadRequest("messages must not be empty".into()));
        }
        if !self.messages.iter().any(|m| m.role == ChatRole::User) {
            return Err(GatewayError::BadRequest(
                "messages must contain at least one user message".into(),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::BadRequest(format!(
                    "temperature must be within [0, 2], got {}",
                    t
                )));
            }
        }
        if let Some(0) = self.max_tokens {
            return Err(GatewayError::BadRequest("max_tokens must be positive".into()));
        }
        Ok(())
    }

    /// The most recent user message — the prompt the evaluators score.
    pub fn latest_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Whether the response cache applies: streams and high-temperature
    /// sampling are never cached.
    pub fn is_cacheable(&self) -> bool {
        !self.stream.unwrap_or(false) && self.temperature.unwrap_or(0.7) <= 1.0
    }
}

/// Why generation stopped, normalized across providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    ContentFilter,
}

/// One completion choice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

/// Token accounting for a single call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Governance verdict appended to the response when the caller asks for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditInfo {
    pub request_id: String,
    pub action: PolicyAction,
    pub scores: EvaluationScores,
    pub violation_count: usize,
    pub applied_rules: Vec<String>,
    #[serde(default)]
    pub cached: bool,
}

/// Canonical model invocation response (OpenAI-shaped).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmResponse {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_info: Option<AuditInfo>,
}

impl LlmResponse {
    /// Content of the first choice, or empty when there are no choices.
    pub fn primary_content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default()
    }

    /// Replace the first choice's content (rewrite path).
    pub fn set_primary_content(&mut self, content: String) {
        if let Some(choice) = self.choices.first_mut() {
            choice.message.content = content;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "gpt-4".into(),
            messages: vec![ChatMessage::user("Hello")],
            temperature: None,
            max_tokens: None,
            stream: None,
            user: None,
            metadata: None,
        }
    }

    #[test]
    fn test_validate_accepts_minimal_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_user_message() {
        let mut req = request();
        req.messages = vec![ChatMessage::system("You are helpful.")];
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_temperature() {
        let mut req = request();
        req.temperature = Some(2.5);
        assert!(req.validate().is_err());
        req.temperature = Some(2.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_cacheable_excludes_streams_and_hot_sampling() {
        let mut req = request();
        assert!(req.is_cacheable());
        req.stream = Some(true);
        assert!(!req.is_cacheable());
        req.stream = None;
        req.temperature = Some(1.5);
        assert!(!req.is_cacheable());
    }
}
