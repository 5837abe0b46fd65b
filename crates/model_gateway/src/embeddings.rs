//! Remote embeddings over the OpenAI `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use orchestra_core::{traits::Embedder, Error, Result};

use crate::openai::{status_error, transport_error};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: SecretString, dimensions: usize) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({
                "model": self.model,
                "input": text,
                "dimensions": self.dimensions,
            }))
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        if !response.status().is_success() {
            return Err(status_error("openai", response).await);
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(None, format!("embedding response parse failed: {}", e)))?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::llm(None, "embedding response was empty"))?;

        if vector.len() != self.dimensions {
            return Err(Error::configuration(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use secrecy::Secret;
    use serde_json::Value;

    async fn serve(dims: usize) -> String {
        let router = Router::new().route(
            "/embeddings",
            post(move |Json(_): Json<Value>| async move {
                Json(json!({"data": [{"embedding": vec![0.5f32; dims]}]}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_embed_checks_dimensions() {
        let base = serve(8).await;
        let ok = OpenAiEmbedder::new(Client::new(), &base, Secret::new("k".into()), 8);
        assert_eq!(ok.embed("hello").await.unwrap().len(), 8);

        let wrong = OpenAiEmbedder::new(Client::new(), &base, Secret::new("k".into()), 16);
        assert!(wrong.embed("hello").await.is_err());
    }
}
