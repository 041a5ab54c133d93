use crate::embedding::Embedder;
use crate::error::{EmbeddingError, MemoryError, Result};
use crate::llm::client::{bearer_headers, post_json};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI 兼容的向量化服务
///
/// `baseurl` 为 `/embeddings` 接口的完整 URL，例如
/// `https://api.openai.com/v1/embeddings`。
pub struct OpenAiEmbedder {
    client: Arc<Client>,
    model: String,
    baseurl: String,
    apikey: String,
}

impl OpenAiEmbedder {
    pub fn new(
        client: Arc<Client>,
        model: impl Into<String>,
        baseurl: impl Into<String>,
        apikey: impl Into<String>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            baseurl: baseurl.into(),
            apikey: apikey.into(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::empty_text("embedding input"));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let headers = bearer_headers(&self.apikey)?;
        let body: EmbeddingResponse =
            post_json::<EmbeddingError, _, _>(&self.client, &self.baseurl, headers, &request).await?;

        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))?;

        debug!(model = %self.model, dim = vector.len(), "🧮 文本向量化完成");
        Ok(vector)
    }
}
