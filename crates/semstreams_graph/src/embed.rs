//! Embedding providers.
//!
//! The HTTP provider speaks the OpenAI-style `/v1/embeddings` contract; the
//! lexical embedder is the mandatory built-in fallback: saturating term
//! frequency × inverse document frequency, sign-hashed into a fixed-size
//! projection and L2-normalised, suitable for cosine ranking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::GraphError;

/// Minimum interval between provider-failure warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Produces dense vectors of a fixed dimension.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The model name stored alongside vectors.
    fn model(&self) -> &str;

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Embedding`] on provider failure.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GraphError>;
}

/// Cosine similarity between two vectors. Zero-length or mismatched vectors
/// score 0.
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ── Lexical embedder ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DfState {
    documents: u64,
    doc_freq: HashMap<String, u64>,
}

/// The built-in lexical embedder.
///
/// Term weights are `tf_sat × idf` where `tf_sat = tf·(k+1)/(tf+k)` with the
/// tunable saturation parameter `k`, and document frequencies accumulate
/// incrementally across embeds. Each weighted term is feature-hashed to one
/// of `dimension` buckets with a hash-derived sign, and the result is
/// L2-normalised.
pub struct LexicalEmbedder {
    dimension: usize,
    saturation: f32,
    state: Mutex<DfState>,
}

impl LexicalEmbedder {
    /// Create an embedder with the given projection size and saturation.
    #[must_use]
    pub fn new(dimension: usize, saturation: f32) -> Self {
        Self {
            dimension: dimension.max(1),
            saturation,
            state: Mutex::new(DfState::default()),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(String::from)
            .collect()
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let index = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) as usize
            % self.dimension;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

#[async_trait]
impl EmbeddingProvider for LexicalEmbedder {
    fn model(&self) -> &str {
        "lexical-tfidf"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GraphError> {
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        // Update document frequencies, then weight under the new totals.
        let idf: HashMap<String, f32> = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.documents += 1;
            for token in tf.keys() {
                *state.doc_freq.entry((*token).to_string()).or_insert(0) += 1;
            }
            let n = state.documents as f32;
            tf.keys()
                .map(|token| {
                    let df = state.doc_freq.get(*token).copied().unwrap_or(1) as f32;
                    ((*token).to_string(), (1.0 + (n + 0.5) / (df + 0.5)).ln())
                })
                .collect()
        };

        let k = self.saturation;
        let mut vector = vec![0.0f32; self.dimension];
        for (token, count) in &tf {
            let tf_sat = count * (k + 1.0) / (count + k);
            let weight = tf_sat * idf.get(*token).copied().unwrap_or(1.0);
            let (index, sign) = self.bucket(token);
            vector[index] += sign * weight;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

// ── HTTP provider ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

/// OpenAI-style HTTP embedding provider.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl HttpEmbedder {
    /// Build a provider from the embedding config.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Embedding`] when no endpoint is configured.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, GraphError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| GraphError::Embedding("http provider requires an endpoint".into()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            model: config.model.clone(),
            dimension: config.dimension,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GraphError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let response = self
            .client
            .post(self.endpoint.as_str())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GraphError::Embedding(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Embedding(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| GraphError::Embedding("empty embeddings response".into()))?;

        if vector.len() != self.dimension {
            return Err(GraphError::Embedding(format!(
                "provider returned dimension {}, expected {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }
}

// ── Fallback composition ────────────────────────────────────────────────────

/// Primary provider with automatic lexical fallback.
///
/// Provider failures are never fatal: the text is re-embedded lexically, a
/// warning is logged at most once per [`WARN_INTERVAL`], and the primary is
/// retried lazily on the next call.
pub struct FallbackEmbedder {
    primary: Option<Box<dyn EmbeddingProvider>>,
    fallback: LexicalEmbedder,
    last_warn: Mutex<Option<Instant>>,
    fallbacks: prometheus::IntCounter,
}

impl FallbackEmbedder {
    /// Compose from config: `provider = "http"` gets the HTTP primary,
    /// anything else is lexical-only.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Embedding`] for an HTTP provider without an
    /// endpoint.
    pub fn from_config(
        config: &EmbeddingConfig,
        fallbacks: prometheus::IntCounter,
    ) -> Result<Self, GraphError> {
        let primary: Option<Box<dyn EmbeddingProvider>> = if config.provider == "http" {
            Some(Box::new(HttpEmbedder::from_config(config)?))
        } else {
            None
        };
        Ok(Self {
            primary,
            fallback: LexicalEmbedder::new(config.dimension, config.saturation),
            last_warn: Mutex::new(None),
            fallbacks,
        })
    }

    fn warn_rate_limited(&self, error: &GraphError) {
        let mut last = match self.last_warn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due = last.is_none_or(|at| at.elapsed() >= WARN_INTERVAL);
        if due {
            warn!(%error, "embedding provider failed, using lexical fallback");
            *last = Some(Instant::now());
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedder {
    fn model(&self) -> &str {
        match &self.primary {
            Some(primary) => primary.model(),
            None => self.fallback.model(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GraphError> {
        if let Some(primary) = &self.primary {
            match primary.embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(error) => {
                    self.warn_rate_limited(&error);
                    self.fallbacks.inc();
                }
            }
        }
        self.fallback.embed(text).await
    }
}
