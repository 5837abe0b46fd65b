//! Vector helpers: similarity metrics and a deterministic local embedder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::Embedder;

/// Similarity used to rank entities against a query embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    DotProduct,
    /// Negated euclidean distance, so larger is closer.
    Euclidean,
}

impl SimilarityMetric {
    /// Higher means more similar. Mismatched lengths score as unrelated.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return match self {
                Self::Euclidean => f32::NEG_INFINITY,
                _ => 0.0,
            };
        }
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::DotProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Self::Euclidean => {
                let d: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                -d.sqrt()
            }
        }
    }
}

fn cosine_similarity(v1: &[f32], v2: &[f32]) -> f32 {
    let dot_product: f32 = v1.iter().zip(v2.iter()).map(|(a, b)| a * b).sum();
    let magnitude1: f32 = v1.iter().map(|a| a * a).sum::<f32>().sqrt();
    let magnitude2: f32 = v2.iter().map(|a| a * a).sum::<f32>().sqrt();

    if magnitude1 == 0.0 || magnitude2 == 0.0 {
        0.0
    } else {
        dot_product / (magnitude1 * magnitude2)
    }
}

/// Bag-of-words hashing embedder. Deterministic and offline; used when no
/// embedding provider is configured and throughout the tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let idx = (string_hash(&word) as usize) % self.dimensions;
            embedding[idx] += 1.0;
        }
        // Normalize
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut embedding {
                *v /= magnitude;
            }
        }
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(1536)
    }
}

/// djb2.
fn string_hash(s: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_is_most_similar() {
        let e = HashEmbedder::new(64);
        let a = e.embed_sync("Acme robotics company");
        let b = e.embed_sync("acme Robotics company!");
        let c = e.embed_sync("Globex shipping");
        let metric = SimilarityMetric::Cosine;
        assert!((metric.score(&a, &b) - 1.0).abs() < 1e-5);
        assert!(metric.score(&a, &c) < metric.score(&a, &b));
    }

    #[test]
    fn test_mismatched_lengths_score_zero() {
        assert_eq!(SimilarityMetric::Cosine.score(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(
            SimilarityMetric::Euclidean.score(&[], &[]),
            f32::NEG_INFINITY
        );
    }

    #[tokio::test]
    async fn test_embedder_trait_dimensions() {
        let e = HashEmbedder::new(8);
        assert_eq!(e.dimensions(), 8);
        assert_eq!(e.embed("").await.unwrap(), vec![0.0; 8]);
    }
}
