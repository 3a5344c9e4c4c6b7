//! Investigation router: admission, dispatch, cancellation, and the
//! reasoning trace for one conversation.
//!
//! Exactly one investigation may be in flight per conversation. Submitting
//! a new question cancels the previous one (last-question-wins); an
//! explicit `cancel()` covers the user's stop button. Every dispatch gets
//! its own `CancellationToken`, and the token is re-checked after each
//! await before any state mutation so a late response for a cancelled
//! request is discarded rather than applied.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::error::{GovernanceError, Result};
use crate::governor::SessionGovernor;
use crate::learning::LearningQueue;
use crate::traits::{InferenceError, InferenceProvider, InferenceRequest};
use crate::types::{BudgetStatus, ConversationTurn, InvestigationMode, StepKind};

/// Rough prompt-size heuristic for admission estimates.
const ESTIMATE_CHARS_PER_TOKEN: usize = 4;
/// Headroom added to every estimate for the model's reply.
const RESPONSE_TOKEN_HEADROOM: u64 = 1_500;

/// Registration of the current dispatch. `seq` increments on every
/// dispatch so a finishing investigation can tell whether the slot still
/// belongs to it; `CancellationToken` clones share identity, so the token
/// alone cannot.
#[derive(Default)]
struct InFlightSlot {
    seq: u64,
    token: Option<CancellationToken>,
}

pub struct InvestigationRouter {
    governor: Arc<SessionGovernor>,
    provider: Arc<dyn InferenceProvider>,
    learning: Arc<LearningQueue>,
    conversation: Mutex<Conversation>,
    in_flight: std::sync::Mutex<InFlightSlot>,
    history_window: usize,
}

impl InvestigationRouter {
    pub fn new(
        governor: Arc<SessionGovernor>,
        provider: Arc<dyn InferenceProvider>,
        learning: Arc<LearningQueue>,
        history_window: usize,
    ) -> Self {
        Self {
            governor,
            provider,
            learning,
            conversation: Mutex::new(Conversation::new()),
            in_flight: std::sync::Mutex::new(InFlightSlot::default()),
            history_window,
        }
    }

    /// Run one investigation end to end. Cancellable at any point before
    /// completion; on cancellation the conversation is left exactly as it
    /// was before this call.
    pub async fn investigate(
        &self,
        question: &str,
        force_mode: Option<InvestigationMode>,
    ) -> Result<ConversationTurn> {
        // Admission strictly before dispatch. A denied request records no
        // assistant turn and never reaches the provider.
        let estimate = estimate_tokens(question);
        let admission = self.governor.can_proceed(estimate).await;
        if !admission.allowed {
            let reason = admission.reason.unwrap_or_else(|| "budget exhausted".to_string());
            info!(reason = %reason, "Investigation denied admission");
            return Err(GovernanceError::BudgetExhausted { reason });
        }

        // Last-question-wins. Cancelling the superseded token happens under
        // the same lock as installing the new one, so no investigation can
        // observe its own token uncancelled after losing the slot.
        let token = CancellationToken::new();
        let dispatch_seq = {
            let mut slot = self.in_flight.lock().expect("in-flight lock poisoned");
            if let Some(previous) = slot.token.take() {
                if !previous.is_cancelled() {
                    debug!("Superseding in-flight investigation");
                    previous.cancel();
                }
            }
            slot.seq += 1;
            slot.token = Some(token.clone());
            slot.seq
        };

        // Append the user turn optimistically and snapshot the bounded
        // history *excluding* it; it is retracted by id on cancellation.
        let user_turn = ConversationTurn::user(question);
        let user_turn_id = user_turn.id.clone();
        let (history, budget_hint) = {
            let mut convo = self.conversation.lock().await;
            let history = convo.recent_window(self.history_window);
            convo.push(user_turn);
            (history, self.governor.status().await)
        };

        let request = InferenceRequest {
            question: question.to_string(),
            history,
            budget_hint,
            force_mode,
        };

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                self.retract_user_turn(&user_turn_id).await;
                return Err(GovernanceError::Cancelled);
            }
            outcome = self.provider.invoke(request) => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                // The user turn stays so the question can be resubmitted
                // without retyping. No durable state is mutated.
                warn!(error = %err, "Inference dispatch failed");
                self.clear_in_flight(dispatch_seq);
                return Err(map_inference_error(err));
            }
        };

        // A late response for a cancelled request must not mutate anything.
        if token.is_cancelled() {
            self.retract_user_turn(&user_turn_id).await;
            return Err(GovernanceError::Cancelled);
        }

        let mode = force_mode.unwrap_or(response.mode);
        if let Some(first) = response.reasoning.first() {
            // Traces are recorded verbatim, never reordered; a trace that
            // does not open with routing is only worth a log line.
            if first.kind != StepKind::Routing {
                warn!(turn = %user_turn_id, "Reasoning trace does not open with a routing step");
            }
        }

        let assistant_turn = ConversationTurn::assistant(
            response.answer,
            mode,
            response.reasoning,
            response.usage.clone(),
            response.follow_ups,
        );

        {
            let mut convo = self.conversation.lock().await;
            if token.is_cancelled() {
                drop(convo);
                self.retract_user_turn(&user_turn_id).await;
                return Err(GovernanceError::Cancelled);
            }
            convo.push(assistant_turn.clone());
        }

        // Usage is recorded only after the turn is durably in history, so
        // the budget and conversation logs stay reconcilable.
        self.governor.record_usage(&response.usage).await;

        // Learning candidates are best-effort: a queue hiccup must not fail
        // an investigation that already answered.
        for candidate in response.learning_candidates {
            let term = candidate.term.clone();
            if let Err(e) = self.learning.submit(candidate).await {
                warn!(term = %term, error = %e, "Failed to queue learning candidate");
            }
        }

        self.clear_in_flight(dispatch_seq);
        info!(
            mode = mode.as_str(),
            tokens = response.usage.total_tokens(),
            latency_ms = response.usage.latency_ms,
            "Investigation completed"
        );
        Ok(assistant_turn)
    }

    /// Cancel the in-flight investigation, if any. Returns whether one was
    /// cancelled.
    pub fn cancel(&self) -> bool {
        let slot = self.in_flight.lock().expect("in-flight lock poisoned");
        match slot.token.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Read-only budget view for the UI.
    pub async fn budget_status(&self) -> BudgetStatus {
        self.governor.status().await
    }

    /// Explicit user-initiated clear: cancels any in-flight work, empties
    /// the conversation, and resets the session budget.
    pub async fn reset_session(&self) -> BudgetStatus {
        self.cancel();
        self.conversation.lock().await.clear();
        self.governor.reset().await
    }

    /// Snapshot of the conversation, oldest first.
    pub async fn conversation(&self) -> Vec<ConversationTurn> {
        self.conversation.lock().await.turns().to_vec()
    }

    async fn retract_user_turn(&self, turn_id: &str) {
        let mut convo = self.conversation.lock().await;
        if convo.retract(turn_id) {
            debug!(turn = %turn_id, "Retracted user turn after cancellation");
        }
    }

    /// Drop the registration for dispatch `dispatch_seq`, but only while the
    /// slot still belongs to it. A newer dispatch bumps the sequence, so a
    /// stale finisher leaves the newer token in place.
    fn clear_in_flight(&self, dispatch_seq: u64) {
        let mut slot = self.in_flight.lock().expect("in-flight lock poisoned");
        if slot.seq == dispatch_seq {
            slot.token = None;
        }
    }
}

fn estimate_tokens(question: &str) -> u64 {
    (question.len() / ESTIMATE_CHARS_PER_TOKEN) as u64 + RESPONSE_TOKEN_HEADROOM
}

fn map_inference_error(err: InferenceError) -> GovernanceError {
    match err {
        InferenceError::Transport(detail) => GovernanceError::Transport { detail },
        InferenceError::Auth(detail) => GovernanceError::Auth { detail },
        InferenceError::RateLimited => GovernanceError::RateLimited,
    }
}
