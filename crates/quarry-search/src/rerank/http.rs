//! Cross-encoder served over HTTP (Cohere/Jina/TEI style `/rerank`).

use anyhow::{Context, Result, anyhow, bail};
use quarry_core::config::HttpRerankConfig;
use serde_json::{Value, json};
use std::time::Duration;

use super::CrossEncoder;

/// Posts `{model, query, documents}` and reads `results[].relevance_score`.
pub struct HttpCrossEncoder {
    agent: ureq::Agent,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpCrossEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCrossEncoder")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpCrossEncoder {
    /// Build a client from config. The API key, if any, is read from the
    /// environment variable named by `api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if `api_key_env` is set but the variable is missing.
    pub fn from_config(config: &HttpRerankConfig) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("rerank API key variable {var} is not set"))?,
            ),
            None => None,
        };

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();

        Ok(Self {
            agent,
            url: format!("{}{}", config.api_base.trim_end_matches('/'), config.path),
            model: config.model.clone(),
            api_key,
        })
    }
}

impl CrossEncoder for HttpCrossEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let body = json!({ "model": self.model, "query": query, "documents": documents });
        let mut request = self.agent.post(&self.url);
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        let response = request
            .send_json(body)
            .with_context(|| format!("rerank request to {} failed", self.url))?;
        let json: Value = response
            .into_json()
            .context("rerank response is not valid JSON")?;
        parse_rerank_response(&json, documents.len())
    }
}

/// Align scores with the request order by each result's `index`. Every
/// document must be scored; a partial response is an error so the reranker
/// keeps the fused order.
#[allow(clippy::cast_possible_truncation)]
fn parse_rerank_response(json: &Value, doc_count: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; doc_count];
    let results = json
        .get("results")
        .or_else(|| json.get("data"))
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("rerank response is missing a results array"))?;

    for item in results {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| anyhow!("rerank result is missing its index"))?;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("rerank result is missing its score"))?;
        if let Some(slot) = scores.get_mut(index) {
            *slot = Some(score as f32);
        }
    }

    let scored = scores.iter().filter(|s| s.is_some()).count();
    if scored != doc_count {
        bail!("rerank response scored {scored} of {doc_count} documents");
    }
    Ok(scores.into_iter().flatten().collect())
}
