//! Test doubles shared across the crate's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::governor::SessionBudgetState;
use crate::traits::{InferenceError, InferenceProvider, InferenceRequest, InferenceResponse};
use crate::types::{InvestigationMode, ReasoningStep, StepKind, TurnUsage};

/// Scripted inference provider: responses are handed out in FIFO order and
/// every request is logged for later assertions.
pub struct MockProvider {
    script: Mutex<Vec<Result<InferenceResponse, InferenceError>>>,
    calls: Mutex<Vec<InferenceRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: InferenceResponse) {
        self.script.lock().unwrap().push(Ok(response));
    }

    pub fn push_error(&self, error: InferenceError) {
        self.script.lock().unwrap().push(Err(error));
    }

    pub fn calls(&self) -> Vec<InferenceRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    async fn invoke(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        self.calls.lock().unwrap().push(request);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(InferenceError::Transport("mock script exhausted".into()));
        }
        script.remove(0)
    }
}

/// Provider whose calls never complete, for exercising cancellation.
pub struct HangingProvider {
    invocations: AtomicUsize,
}

impl HangingProvider {
    pub fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for HangingProvider {
    async fn invoke(
        &self,
        _request: InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// In-memory [`crate::traits::SessionStore`].
pub struct MemorySessionStore {
    states: Mutex<std::collections::HashMap<String, SessionBudgetState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl crate::traits::SessionStore for MemorySessionStore {
    async fn load(&self, session_key: &str) -> anyhow::Result<Option<SessionBudgetState>> {
        Ok(self.states.lock().unwrap().get(session_key).cloned())
    }

    async fn save(&self, session_key: &str, state: &SessionBudgetState) -> anyhow::Result<()> {
        self.states
            .lock()
            .unwrap()
            .insert(session_key.to_string(), state.clone());
        Ok(())
    }
}

pub fn sample_usage() -> TurnUsage {
    TurnUsage {
        input_tokens: 900,
        output_tokens: 300,
        cost_usd: 0.01,
        latency_ms: 850,
    }
}

/// A well-formed quick-mode response whose trace opens with routing.
pub fn text_response(answer: &str) -> InferenceResponse {
    InferenceResponse {
        answer: answer.to_string(),
        mode: InvestigationMode::Quick,
        reasoning: vec![
            ReasoningStep::new(StepKind::Routing, "quick lookup suffices"),
            ReasoningStep::new(StepKind::Thinking, "matching against shipment data"),
        ],
        usage: sample_usage(),
        learning_candidates: Vec::new(),
        follow_ups: vec!["Want the per-lane breakdown?".to_string()],
    }
}
