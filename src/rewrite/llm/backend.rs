//! 后端选择与 HTTP 公共逻辑

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use super::gemini::GeminiClient;
use super::local::LocalClient;
use super::openai::OpenAiClient;
use super::retry::{classify_message, classify_status};
use super::{ChatMessage, GenerationParams, GeneratorProvider, TextGenerator};
use crate::rewrite::config::Settings;
use crate::rewrite::error::{GenerationError, GenerationResult, RewriteError, RewriteResult};
use crate::rewrite::models::BackendKind;

/// 按配置选定的生成后端
pub enum Backend {
    OpenAi(OpenAiClient),
    Gemini(GeminiClient),
    Local(LocalClient),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::OpenAi(_) => BackendKind::OpenAi,
            Backend::Gemini(_) => BackendKind::Gemini,
            Backend::Local(_) => BackendKind::Local,
        }
    }
}

#[async_trait]
impl TextGenerator for Backend {
    async fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> GenerationResult<String> {
        match self {
            Backend::OpenAi(client) => client.send(messages, params).await,
            Backend::Gemini(client) => client.send(messages, params).await,
            Backend::Local(client) => client.send(messages, params).await,
        }
    }

    fn model(&self) -> &str {
        match self {
            Backend::OpenAi(client) => client.model(),
            Backend::Gemini(client) => client.model(),
            Backend::Local(client) => client.model(),
        }
    }
}

/// 基于 HTTP 的生成器提供者
pub struct HttpBackends {
    client: Client,
    openai_base_url: String,
    openai_api_key: Option<String>,
    gemini_base_url: String,
    gemini_api_key: Option<String>,
    local_url: String,
}

impl HttpBackends {
    pub fn from_settings(settings: &Settings) -> RewriteResult<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RewriteError::ClientUnavailable(format!("HTTP 客户端初始化失败: {}", e)))?;

        Ok(Self {
            client,
            openai_base_url: settings.openai_base_url.clone(),
            openai_api_key: settings.openai_api_key.clone(),
            gemini_base_url: settings.gemini_base_url.clone(),
            gemini_api_key: settings.gemini_api_key.clone(),
            local_url: settings.local_url.clone(),
        })
    }

    /// 构造具体后端
    pub fn build(&self, backend: BackendKind, model: &str) -> RewriteResult<Backend> {
        if model.trim().is_empty() {
            return Err(RewriteError::ClientUnavailable("模型名称为空".to_string()));
        }

        let backend = match backend {
            BackendKind::OpenAi => {
                let api_key = self.openai_api_key.clone().ok_or_else(|| {
                    RewriteError::ClientUnavailable("未设置 OPENAI_API_KEY".to_string())
                })?;
                Backend::OpenAi(OpenAiClient::new(
                    self.client.clone(),
                    &self.openai_base_url,
                    api_key,
                    model,
                ))
            }
            BackendKind::Gemini => {
                let api_key = self.gemini_api_key.clone().ok_or_else(|| {
                    RewriteError::ClientUnavailable("未设置 GEMINI_API_KEY".to_string())
                })?;
                Backend::Gemini(GeminiClient::new(
                    self.client.clone(),
                    &self.gemini_base_url,
                    api_key,
                    model,
                ))
            }
            BackendKind::Local => {
                Backend::Local(LocalClient::new(self.client.clone(), &self.local_url, model))
            }
        };

        tracing::debug!("创建生成客户端: {} / {}", backend.kind(), model);
        Ok(backend)
    }
}

impl GeneratorProvider for HttpBackends {
    fn generator(&self, backend: BackendKind, model: &str) -> RewriteResult<Arc<dyn TextGenerator>> {
        Ok(Arc::new(self.build(backend, model)?))
    }
}

/// 发送请求并解析 JSON 响应，失败时按状态码和正文分类
pub(crate) async fn execute_json<R: DeserializeOwned>(
    request: RequestBuilder,
    timeout: Option<Duration>,
) -> GenerationResult<R> {
    let request = match timeout {
        Some(timeout) => request.timeout(timeout),
        None => request,
    };

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &body));
    }

    response
        .json::<R>()
        .await
        .map_err(|e| GenerationError::TransportError(format!("响应解析失败: {}", e)))
}

fn transport_error(error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::TransportError(format!("请求超时: {}", error))
    } else if error.is_connect() {
        GenerationError::TransportError(format!("连接失败: {}", error))
    } else {
        classify_message(&error.to_string())
    }
}

/// 空响应视为传输错误
pub(crate) fn non_empty(text: String) -> GenerationResult<String> {
    if text.trim().is_empty() {
        Err(GenerationError::TransportError("模型返回了空响应".to_string()))
    } else {
        Ok(text)
    }
}
