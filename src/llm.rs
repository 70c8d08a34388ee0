//! Language-model intent extraction over an OpenAI-compatible chat completion endpoint.

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ChatCompletionConfig;
use crate::error::IntentError;
use crate::intent::{parse_model_content, IntentExtractor, IntentRequest, RawIntent};

const SYSTEM_PROMPT: &str = "You extract meeting details from emails. \
Reply with a single JSON object and nothing else, shaped as \
{\"participants\": [\"email or name\"], \"duration_minutes\": 30, \"time_constraints\": \"day and time as written\"}. \
Only list people who appear in the email or the attendee list. \
Use null for anything the email does not say.";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

pub struct ChatCompletionExtractor {
    client: reqwest::Client,
    config: ChatCompletionConfig,
}

impl ChatCompletionExtractor {
    pub fn new(config: ChatCompletionConfig) -> Self {
        ChatCompletionExtractor {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn user_message(request: &IntentRequest<'_>) -> String {
        let attendees = request
            .attendees
            .iter()
            .map(|attendee| attendee.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Organizer: {}\nAttendees: {}\n\nEmail:\n{}",
            request.organizer, attendees, request.text
        )
    }
}

#[async_trait]
impl IntentExtractor for ChatCompletionExtractor {
    async fn extract(&self, request: &IntentRequest<'_>) -> Result<RawIntent, IntentError> {
        let payload = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                ChatMessage { role: "system".to_string(), content: Some(SYSTEM_PROMPT.to_string()) },
                ChatMessage { role: "user".to_string(), content: Some(Self::user_message(request)) },
            ],
        });
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut call = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(self.config.timeout())
            .json(&payload);
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.map_err(|e| {
            if e.is_timeout() {
                IntentError::Timeout(self.config.timeout())
            } else {
                IntentError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Chat completion endpoint answered {}", status);
            return Err(IntentError::Unavailable(format!("HTTP {}", status)));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| IntentError::Malformed(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| IntentError::Malformed("completion has no content".to_string()))?;

        debug!("Model reply: {}", content);
        parse_model_content(&content)
    }

    fn name(&self) -> &'static str {
        "chat_completion"
    }
}
