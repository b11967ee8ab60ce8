//! In-memory `LlmClient` for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError};

type Responder = Box<dyn Fn(&str, &str) -> Result<ChatResponse, LlmError> + Send + Sync>;

/// A call observed by [`ScriptedClient`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    pub image_count: usize,
    pub temperature: Option<f64>,
}

/// Client whose replies are computed by a closure over `(model, prompt)`.
pub struct ScriptedClient {
    responder: Responder,
    delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Build a successful response with `stop` as finish reason.
pub fn reply(text: &str) -> Result<ChatResponse, LlmError> {
    Ok(ChatResponse {
        content: Some(text.to_string()),
        finish_reason: Some("stop".to_string()),
    })
}

impl ScriptedClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<ChatResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Every call returns the same text.
    pub fn always(text: &'static str) -> Self {
        Self::new(move |_, _| reply(text))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for_model(&self, model: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.model == model)
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let prompt = messages
            .iter()
            .filter_map(|m| m.text_content())
            .collect::<Vec<_>>()
            .join("\n");
        let image_count = messages.iter().map(|m| m.content.image_count()).sum();
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            prompt: prompt.clone(),
            image_count,
            temperature: options.temperature,
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.responder)(model, &prompt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
