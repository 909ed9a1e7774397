//! OpenAI chat completions 后端

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::backend::{execute_json, non_empty};
use super::{ChatMessage, GenerationParams, TextGenerator};
use crate::rewrite::error::{GenerationError, GenerationResult};

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(client: Client, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &GenerationParams,
    ) -> CompletionRequest<'a> {
        // top_k 不被该接口支持
        CompletionRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        }
    }
}

fn first_choice(response: CompletionResponse) -> GenerationResult<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GenerationError::TransportError("响应中没有候选结果".to_string()))?;
    non_empty(content)
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> GenerationResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages, params));

        let response: CompletionResponse = execute_json(request, params.timeout).await?;
        first_choice(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
