//! Consensus reasoner: one text-only call that reconciles sampled attempts.

use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, Role};
use crate::prompts;
use crate::task::{Attempt, FinalAnswer};

#[derive(Debug, thiserror::Error)]
pub enum ReasonerError {
    #[error("No attempts to reconcile")]
    NoAttempts,
}

pub struct ConsensusReasoner {
    client: Arc<dyn LlmClient>,
    dispatcher: Dispatcher,
    model: String,
    options: ChatOptions,
}

impl ConsensusReasoner {
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

    /// Reconcile `attempts` into a final answer with exactly one remote call.
    ///
    /// A remote failure is returned inside the [`FinalAnswer`], not as an
    /// error; only an empty attempt list is rejected.
    pub async fn reconcile(
        &self,
        question: &str,
        attempts: &[Attempt],
    ) -> Result<FinalAnswer, ReasonerError> {
        if attempts.is_empty() {
            return Err(ReasonerError::NoAttempts);
        }

        let prompt = prompts::reasoning_prompt(question, attempts);
        let messages = vec![ChatMessage::new(Role::User, prompt)];

        let outcome = self
            .dispatcher
            .run(|| self.client.chat_completion(&self.model, &messages, &self.options))
            .await;

        Ok(match outcome {
            Ok(response) => FinalAnswer::from_response(response),
            Err(e) => {
                tracing::error!(error = %e, "Reasoning call failed");
                FinalAnswer::from_error(&e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::OptionLabel;
    use crate::llm::testing::{reply, ScriptedClient};
    use crate::llm::LlmError;
    use crate::task::FailureKind;
    use std::time::Duration;

    fn attempt(n: u32, text: &str) -> Attempt {
        Attempt::from_response(n, reply(text).unwrap())
    }

    fn reasoner(client: Arc<ScriptedClient>) -> ConsensusReasoner {
        ConsensusReasoner::new(
            client,
            Dispatcher::new(2, Duration::from_secs(5)),
            "reasoning",
            ChatOptions::default(),
        )
    }

    #[tokio::test]
    async fn single_call_with_all_attempts_verbatim() {
        let client = Arc::new(ScriptedClient::always(
            "<answer>C</answer><explanation>two of three agree</explanation>",
        ));
        let attempts = vec![
            attempt(1, "obs one <answer>C</answer>"),
            attempt(3, "obs three <answer>A</answer>"),
        ];

        let answer = reasoner(client.clone()).reconcile("Q?", &attempts).await.unwrap();

        assert_eq!(answer.label, Some(OptionLabel::C));
        assert_eq!(answer.explanation.as_deref(), Some("two of three agree"));
        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].image_count, 0);
        assert!(calls[0].prompt.contains("Attempt 1:\nobs one <answer>C</answer>"));
        assert!(calls[0].prompt.contains("Attempt 3:\nobs three <answer>A</answer>"));
    }

    #[tokio::test]
    async fn remote_failure_is_captured() {
        let client = Arc::new(ScriptedClient::new(|_, _| {
            Err(LlmError::network_error("connection reset".to_string()))
        }));
        let answer = reasoner(client)
            .reconcile("Q?", &[attempt(1, "<answer>B</answer>")])
            .await
            .unwrap();
        assert_eq!(answer.label, None);
        assert_eq!(answer.failure(), Some(FailureKind::RemoteCallFailure));
    }

    #[tokio::test]
    async fn empty_attempts_are_rejected_without_a_call() {
        let client = Arc::new(ScriptedClient::always("<answer>A</answer>"));
        let err = reasoner(client.clone()).reconcile("Q?", &[]).await.unwrap_err();
        assert!(matches!(err, ReasonerError::NoAttempts));
        assert!(client.calls().is_empty());
    }
}
