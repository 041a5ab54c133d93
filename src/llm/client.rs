//! OpenAI 兼容接口的 JSON POST，对话与向量化共用
//!
//! 传输层失败只分三类（网络、状态码、响应体），按调用方所属服务映射为对应的错误类型。

use crate::error::{EmbeddingError, LlmError, MemoryError, Result, describe_reqwest};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

pub(crate) enum HttpFailure {
    Network(String),
    Status { status: u16, message: String },
    Body(String),
}

/// 把传输层失败归入具体服务的错误类型
pub(crate) trait ServiceError: Into<MemoryError> {
    fn from_http(failure: HttpFailure) -> Self;
}

impl ServiceError for LlmError {
    fn from_http(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Network(msg) => LlmError::NetworkError(msg),
            HttpFailure::Status { status, message } => LlmError::ApiError { status, message },
            HttpFailure::Body(msg) => LlmError::InvalidResponse(msg),
        }
    }
}

impl ServiceError for EmbeddingError {
    fn from_http(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Network(msg) => EmbeddingError::NetworkError(msg),
            HttpFailure::Status { status, message } => EmbeddingError::ApiError { status, message },
            HttpFailure::Body(msg) => EmbeddingError::InvalidResponse(msg),
        }
    }
}

/// `Authorization: Bearer <apikey>` + JSON 内容类型
pub(crate) fn bearer_headers(apikey: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let auth = HeaderValue::from_str(&format!("Bearer {}", apikey))
        .map_err(|e| MemoryError::Other(format!("Invalid Authorization header: {}", e)))?;
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

pub(crate) async fn post_json<E, Req, Resp>(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    body: &Req,
) -> Result<Resp>
where
    E: ServiceError,
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let fail = |failure: HttpFailure| -> MemoryError { E::from_http(failure).into() };

    let response = client
        .post(url)
        .headers(headers)
        .json(body)
        .send()
        .await
        .map_err(|e| fail(HttpFailure::Network(describe_reqwest(&e))))?;

    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        debug!(url, status = status.as_u16(), "📨 接口返回错误状态");
        return Err(fail(HttpFailure::Status {
            status: status.as_u16(),
            message,
        }));
    }

    response
        .json::<Resp>()
        .await
        .map_err(|e| fail(HttpFailure::Body(e.to_string())))
}
