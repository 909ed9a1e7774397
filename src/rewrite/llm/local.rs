//! 本地模型后端（Ollama 兼容的 `/api/chat`）

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::backend::{execute_json, non_empty};
use super::{ChatMessage, GenerationParams, TextGenerator};
use crate::rewrite::error::GenerationResult;

pub struct LocalClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[allow(dead_code)]
    #[serde(default)]
    done: bool,
}

impl LocalClient {
    pub fn new(client: Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl TextGenerator for LocalClient {
    async fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> GenerationResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
                top_p: params.top_p,
                top_k: params.top_k,
            },
        };

        let url = format!("{}/api/chat", self.base_url);
        let response: ChatResponse =
            execute_json(self.client.post(&url).json(&request), params.timeout).await?;

        non_empty(response.message.content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = r#"{"model":"llama3","message":{"role":"assistant","content":"Bonjour"},"done":true}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.message.content, "Bonjour");
    }

    #[test]
    fn test_request_options() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "llama3",
            messages: &messages,
            stream: false,
            options: ChatOptions {
                temperature: 0.5,
                num_predict: 128,
                top_p: None,
                top_k: Some(40),
            },
        };

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 128);
        assert!(body["options"].get("top_p").is_none());
    }
}
