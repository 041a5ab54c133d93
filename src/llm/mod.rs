pub(crate) mod client;
pub mod config;
pub mod types;

use crate::error::{LlmError, Result};
use crate::llm::client::{bearer_headers, post_json};
use crate::llm::config::ModelConfig;
use crate::llm::types::{ChatCompletionRequest, ChatCompletionResponse, Message, ResponseFormat};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

/// 调用 `/chat/completions`，`model.baseurl` 为完整的接口 URL
pub async fn chat(
    client: &Client,
    model: &ModelConfig,
    messages: Vec<Message>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    response_format: Option<ResponseFormat>,
) -> Result<ChatCompletionResponse> {
    let request_body = ChatCompletionRequest {
        model: model.model.clone(),
        messages,
        temperature,
        max_tokens,
        response_format,
    };
    let headers = bearer_headers(&model.apikey)?;
    let response: ChatCompletionResponse =
        post_json::<LlmError, _, _>(client, &model.baseurl, headers, &request_body).await?;
    debug!(model = %model.model, choices = response.choices.len(), "💬 对话补全完成");
    Ok(response)
}

/// 重要性判定、会话摘要等内部组件使用的轻量 LLM 调用接口
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 发起一次简单的无工具对话，返回模型的文本内容
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String> {
        (**self).chat_simple(messages).await
    }
}

/// 基于 `chat` 函数的默认实现
pub struct DefaultLlmClient {
    client: Arc<Client>,
    model: ModelConfig,
    json_output: bool,
}

impl DefaultLlmClient {
    pub fn new(client: Arc<Client>, model: ModelConfig) -> Self {
        Self {
            client,
            model,
            json_output: false,
        }
    }

    /// 要求模型以 JSON 对象输出（重要性判定使用）
    pub fn json_output(mut self, enabled: bool) -> Self {
        self.json_output = enabled;
        self
    }
}

#[async_trait]
impl LlmClient for DefaultLlmClient {
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String> {
        let response_format = self.json_output.then_some(ResponseFormat::JsonObject);
        let response = chat(
            &self.client,
            &self.model,
            messages,
            Some(0.3),
            Some(2048),
            response_format,
        )
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyResponse.into())
    }
}
