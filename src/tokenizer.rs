//! Token estimation for calls that report no usage
//!
//! Peer agents answer with opaque JSON and no token counts, so delegation
//! cost is approximated from the envelope and response text.

/// Character-based token estimator
pub struct TokenCounter {
    /// Average characters per token (~4 for English prose)
    chars_per_token: f32,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self { chars_per_token: 3.8 }
    }

    /// Count approximate tokens in text
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count();
        let base_tokens = (char_count as f32 / self.chars_per_token).ceil() as usize;

        (base_tokens as f32 * self.adjustment(text)).ceil() as usize
    }

    /// Count tokens of a JSON payload in its compact serialized form
    pub fn count_json(&self, value: &serde_json::Value) -> usize {
        self.count(&value.to_string())
    }

    fn adjustment(&self, text: &str) -> f32 {
        let mut factor = 1.0f32;

        // Structured payloads are token-dense
        if text.starts_with('{') || text.starts_with('[') {
            factor *= 1.2;
        }

        if text.contains("http://") || text.contains("https://") {
            factor *= 1.1;
        }

        let digit_ratio = text.chars().filter(|c| c.is_ascii_digit()).count() as f32
            / text.len().max(1) as f32;
        if digit_ratio > 0.3 {
            factor *= 0.9;
        }

        factor
    }
}
