//! Attempt sampler: N independent visually grounded calls per task.

use futures::future::join_all;
use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::evidence::Evidence;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, Role};
use crate::prompts;
use crate::task::{Attempt, Task};

/// Issues identical sampling calls through the shared dispatcher.
pub struct AttemptSampler {
    client: Arc<dyn LlmClient>,
    dispatcher: Dispatcher,
    model: String,
    options: ChatOptions,
}

impl AttemptSampler {
    pub fn new(
        client: Arc<dyn LlmClient>,
        dispatcher: Dispatcher,
        model: impl Into<String>,
        options: ChatOptions,
    ) -> Self {
        Self {
            client,
            dispatcher,
            model: model.into(),
            options,
        }
    }

    /// Sample `attempt_count` attempts for `task`.
    ///
    /// All calls are submitted before any is awaited; the dispatcher decides
    /// how many actually run at once. The output holds exactly one attempt per
    /// requested call, ordered by `attempt_number`, with failures captured in
    /// place rather than returned.
    pub async fn sample(
        &self,
        task: &Task,
        evidence: &Evidence,
        attempt_count: usize,
    ) -> Vec<Attempt> {
        let prompt = prompts::sampling_prompt(task.question(), evidence.len());
        let messages = vec![ChatMessage::with_images(Role::User, prompt, &evidence.frames)];

        let calls = (1..=attempt_count.max(1) as u32).map(|attempt_number| {
            let messages = &messages;
            async move {
                tracing::debug!(
                    task_id = %task.id(),
                    attempt = attempt_number,
                    "Dispatching sampling call"
                );
                let outcome = self
                    .dispatcher
                    .run(|| self.client.chat_completion(&self.model, messages, &self.options))
                    .await;
                match outcome {
                    Ok(response) => Attempt::from_response(attempt_number, response),
                    Err(e) => {
                        tracing::error!(
                            task_id = %task.id(),
                            attempt = attempt_number,
                            error = %e,
                            "Sampling call failed"
                        );
                        Attempt::from_error(attempt_number, &e)
                    }
                }
            }
        });

        join_all(calls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::OptionLabel;
    use crate::llm::testing::{reply, ScriptedClient};
    use crate::llm::LlmError;
    use crate::task::TaskId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn task() -> Task {
        Task::new(TaskId::new("00001"), "Is it safe to turn?\nA. Yes\nB. No")
    }

    fn evidence(n: usize) -> Evidence {
        Evidence {
            frames: (0..n).map(|i| format!("data:image/jpeg;base64,{}", i)).collect(),
        }
    }

    fn options() -> ChatOptions {
        ChatOptions {
            temperature: Some(0.7),
            top_p: None,
            max_tokens: Some(8192),
        }
    }

    #[tokio::test]
    async fn one_attempt_per_requested_call_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let client = Arc::new(ScriptedClient::new(move |_, _| {
            match seen.fetch_add(1, Ordering::SeqCst) {
                1 => Err(LlmError::server_error(503, "busy".to_string())),
                _ => reply("frames show a red light <answer>B. No</answer>"),
            }
        }));
        let sampler = AttemptSampler::new(
            client.clone(),
            Dispatcher::new(1, Duration::from_secs(5)),
            "vision",
            options(),
        );

        let attempts = sampler.sample(&task(), &evidence(5), 3).await;

        assert_eq!(attempts.len(), 3);
        let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(attempts.iter().filter(|a| a.is_usable()).count(), 2);
        assert!(attempts.iter().any(|a| a.error.is_some()));
        assert!(attempts
            .iter()
            .filter(|a| a.is_usable())
            .all(|a| a.label == Some(OptionLabel::B)));
    }

    #[tokio::test]
    async fn every_call_carries_prompt_frames_and_options() {
        let client = Arc::new(ScriptedClient::always("<answer>A</answer>"));
        let sampler = AttemptSampler::new(
            client.clone(),
            Dispatcher::new(5, Duration::from_secs(5)),
            "vision",
            options(),
        );

        sampler.sample(&task(), &evidence(4), 3).await;

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        for call in &calls {
            assert_eq!(call.model, "vision");
            assert_eq!(call.image_count, 4);
            assert_eq!(call.temperature, Some(0.7));
            assert!(call.prompt.contains("Is it safe to turn?"));
            assert!(call.prompt.contains("Frame 1 through Frame 4"));
        }
    }

    #[tokio::test]
    async fn timeouts_become_failed_attempts() {
        let client = Arc::new(
            ScriptedClient::always("<answer>A</answer>").with_delay(Duration::from_millis(200)),
        );
        let sampler = AttemptSampler::new(
            client,
            Dispatcher::new(5, Duration::from_millis(20)),
            "vision",
            options(),
        );

        let attempts = sampler.sample(&task(), &evidence(1), 2).await;
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| !a.is_usable()));
        assert!(attempts
            .iter()
            .all(|a| a.error_kind == Some(crate::llm::LlmErrorKind::Timeout)));
    }
}
