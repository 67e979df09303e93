//! Scripted provider for tests and dry runs.

use super::{Completion, CompletionProvider, CompletionRequest, ProviderError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(ProviderError),
    /// Never completes; exercises per-attempt timeouts.
    Hang,
}

/// Provider double that replays queued outcomes in order.
///
/// When the queue is empty the default step is used (if any), otherwise the
/// call fails fatally.
pub struct ScriptedProvider {
    model: String,
    steps: Mutex<VecDeque<ScriptStep>>,
    default_step: Option<ScriptStep>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            steps: Mutex::new(VecDeque::new()),
            default_step: None,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, step: ScriptStep) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }

    pub fn then_reply(self, content: impl Into<String>) -> Self {
        self.then(ScriptStep::Reply(content.into()))
    }

    pub fn then_fail(self, err: ProviderError) -> Self {
        self.then(ScriptStep::Fail(err))
    }

    pub fn with_default(mut self, step: ScriptStep) -> Self {
        self.default_step = Some(step);
        self
    }

    /// Delay applied before every outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .or_else(|| self.default_step.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match step {
            Some(ScriptStep::Reply(content)) => Ok(Completion {
                content,
                model: self.model.clone(),
                tokens_used: None,
            }),
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::Hang) => std::future::pending().await,
            None => Err(ProviderError::fatal("script exhausted")),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
