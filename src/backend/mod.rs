pub mod gemini;
pub mod rest;
pub mod spark;

use async_trait::async_trait;

use crate::{errors::GatewayError, models::CallResult};

/// Receives the cumulative answer text after every growth step.
pub type UpdateFn<'a> = dyn FnMut(&str) + Send + 'a;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(
        &self,
        prompt: &str,
        on_update: &mut UpdateFn<'_>,
    ) -> Result<CallResult, GatewayError>;
}

/// Per-call accumulated answer. Only ever grows, so every value handed to
/// the update callback extends the previous one.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and reports the new total. Empty fragments are
    /// dropped without a callback.
    pub fn append(&mut self, fragment: &str, on_update: &mut UpdateFn<'_>) -> bool {
        if fragment.is_empty() {
            return false;
        }
        self.text.push_str(fragment);
        on_update(&self.text);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn into_result(self) -> CallResult {
        CallResult { text: self.text }
    }
}
