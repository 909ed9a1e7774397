//! Gemini generateContent 后端

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::backend::{execute_json, non_empty};
use super::{ChatMessage, GenerationParams, TextGenerator};
use crate::rewrite::error::{GenerationError, GenerationResult};

pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiClient {
    pub fn new(client: Client, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    /// system 消息合并为 systemInstruction，assistant 角色映射为 model
    fn request_body(messages: &[ChatMessage], params: &GenerationParams) -> GenerateRequest {
        let system: Vec<Part> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| Part {
                text: m.content.clone(),
            })
            .collect();

        let contents = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| Content {
                role: Some(if m.role == "assistant" { "model" } else { "user" }.to_string()),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GenerateRequest {
            system_instruction: (!system.is_empty()).then_some(Content {
                role: None,
                parts: system,
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                top_p: params.top_p,
                top_k: params.top_k,
            },
        }
    }
}

fn candidate_text(response: GenerateResponse) -> GenerationResult<String> {
    let content = response
        .candidates
        .into_iter()
        .find_map(|candidate| candidate.content)
        .ok_or_else(|| GenerationError::TransportError("响应中没有候选结果".to_string()))?;

    let text: String = content.parts.into_iter().map(|part| part.text).collect();
    non_empty(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> GenerationResult<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(messages, params));

        let response: GenerateResponse = execute_json(request, params.timeout).await?;
        candidate_text(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
