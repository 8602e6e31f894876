//! Vector representation for the similarity tier

use super::key::normalize_request;

pub trait Embedder: Send + Sync {
    /// Unit-length vector for `text`; empty text yields an empty vector
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Bag-of-words feature hashing over unigrams and bigrams
///
/// Deterministic across processes and releases, so embeddings stored in a
/// cache snapshot remain comparable after a restart.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 256;

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let normalized = normalize_request(text);
        let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut vector = vec![0.0_f32; self.dimensions];
        let mut add = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let slot = (hash % self.dimensions as u64) as usize;
            // Sign bit spreads collisions instead of always reinforcing them
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign * weight;
        };
        for word in &words {
            add(word, 1.0);
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

/// Cosine similarity; 0.0 for empty or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_is_fully_similar() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("how do I restart the api server");
        let b = embedder.embed("How do I restart the API server?");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_near_duplicates_score_above_unrelated() {
        let embedder = HashingEmbedder::default();
        let base = embedder.embed("how do i restart the api server");
        let near = embedder.embed("how do i restart the api server please");
        let far = embedder.embed("what is the capital of portugal");
        let near_score = cosine_similarity(&base, &near);
        let far_score = cosine_similarity(&base, &far);
        assert!(near_score > 0.85, "near duplicate scored {near_score}");
        assert!(far_score < 0.5, "unrelated text scored {far_score}");
    }

    #[test]
    fn test_empty_inputs() {
        let embedder = HashingEmbedder::default();
        assert!(embedder.embed("?!").is_empty());
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
