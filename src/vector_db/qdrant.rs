//! Qdrant REST 客户端
//!
//! 只实现记忆层用到的接口：
//!
//! | 操作 | 请求 |
//! |------|------|
//! | 集合是否存在 | `GET /collections/{name}` |
//! | 创建集合 | `PUT /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//! | 检索 | `POST /collections/{name}/points/search` |
//! | 删除 | `POST /collections/{name}/points/delete?wait=true` |

use crate::error::{MemoryError, Result, VectorDbError, describe_reqwest};
use crate::vector_db::{
    Distance, Payload, Point, PointSelector, ScopeFilter, ScoredPoint, VectorDatabase,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct QdrantScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

pub struct QdrantClient {
    client: Arc<Client>,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantClient {
    pub fn new(client: Arc<Client>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.with_auth(request)
            .send()
            .await
            .map_err(|e| VectorDbError::NetworkError(describe_reqwest(&e)).into())
    }
}

async fn api_error(response: Response) -> MemoryError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    VectorDbError::ApiError { status, message }.into()
}

fn filter_json(filter: &ScopeFilter) -> Value {
    let matches = filter
        .conditions()
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }));
    let empties = filter
        .empty_keys()
        .iter()
        .map(|key| json!({ "is_empty": { "key": key } }));
    let must: Vec<Value> = matches.chain(empties).collect();
    json!({ "must": must })
}

fn point_id(id: Value) -> String {
    match id {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorDatabase for QdrantClient {
    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let response = self
            .send(self.client.get(self.url(&format!("/collections/{collection}"))))
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(api_error(response).await),
        }
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<()> {
        let body = json!({
            "vectors": { "size": dimension, "distance": distance }
        });
        let response = self
            .send(
                self.client
                    .put(self.url(&format!("/collections/{collection}")))
                    .json(&body),
            )
            .await?;

        if response.status().is_success() {
            debug!(collection, dimension, "📦 Qdrant 集合已创建");
            return Ok(());
        }
        if response.status() == StatusCode::CONFLICT {
            return Err(VectorDbError::AlreadyExists(collection.to_string()).into());
        }
        match api_error(response).await {
            MemoryError::VectorDb(VectorDbError::ApiError { message, .. })
                if message.contains("already exists") =>
            {
                Err(VectorDbError::AlreadyExists(collection.to_string()).into())
            }
            other => Err(other),
        }
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let points: Vec<Value> = points
            .into_iter()
            .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
            .collect();
        let response = self
            .send(
                self.client
                    .put(self.url(&format!("/collections/{collection}/points?wait=true")))
                    .json(&json!({ "points": points })),
            )
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                Err(VectorDbError::CollectionNotFound(collection.to_string()).into())
            }
            _ => Err(api_error(response).await),
        }
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&ScopeFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter_json(filter);
        }

        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/collections/{collection}/points/search")))
                    .json(&body),
            )
            .await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(VectorDbError::CollectionNotFound(collection.to_string()).into());
            }
            _ => return Err(api_error(response).await),
        }

        let parsed = response
            .json::<QdrantResponse<Vec<QdrantScoredPoint>>>()
            .await
            .map_err(|e| VectorDbError::InvalidResponse(e.to_string()))?;
        Ok(parsed
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                id: point_id(p.id),
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete(&self, collection: &str, selector: PointSelector) -> Result<()> {
        let body = match selector {
            PointSelector::Ids(ids) => json!({ "points": ids }),
            PointSelector::Filter(filter) => json!({ "filter": filter_json(&filter) }),
        };
        let response = self
            .send(
                self.client
                    .post(self.url(&format!(
                        "/collections/{collection}/points/delete?wait=true"
                    )))
                    .json(&body),
            )
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                Err(VectorDbError::CollectionNotFound(collection.to_string()).into())
            }
            _ => Err(api_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_json_shape() {
        let filter = ScopeFilter::session("alice");
        assert_eq!(
            filter_json(&filter),
            json!({ "must": [{ "key": "session_id", "match": { "value": "alice" } }] })
        );
        assert_eq!(
            filter_json(&ScopeFilter::sessionless()),
            json!({ "must": [{ "is_empty": { "key": "session_id" } }] })
        );
    }

    #[test]
    fn test_search_response_parsing() {
        let raw = r#"{
            "result": [
                {"id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26", "version": 3, "score": 0.93, "payload": {"text": "User loves coffee"}},
                {"id": 42, "version": 1, "score": 0.5}
            ],
            "status": "ok",
            "time": 0.001
        }"#;
        let parsed: QdrantResponse<Vec<QdrantScoredPoint>> = serde_json::from_str(raw).unwrap();
        let points: Vec<_> = parsed.result.into_iter().map(|p| point_id(p.id)).collect();
        assert_eq!(points, vec!["5c56c793-69f3-4fbf-87e6-c4bf54c28c26", "42"]);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = QdrantClient::new(Arc::new(Client::new()), "http://localhost:6333/", None);
        assert_eq!(client.url("/collections/x"), "http://localhost:6333/collections/x");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_service_failure() {
        let client = QdrantClient::new(Arc::new(Client::new()), "http://127.0.0.1:9", None);
        let err = client.collection_exists("memories").await.unwrap_err();
        assert!(err.is_service_failure());
    }
}
