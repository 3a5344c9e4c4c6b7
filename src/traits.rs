//! Collaborator contracts consumed by the governance engine.
//!
//! The LLM inference call, the knowledge store, and the session persistence
//! substrate are all external; these traits pin down exactly what the
//! engine needs from them and nothing more. Implementations are shared as
//! `Arc<dyn ...>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::governor::SessionBudgetState;
use crate::types::{
    BudgetStatus, ConversationTurn, CustomerId, InvestigationMode, KnowledgeEntry, KnowledgeScope,
    LearningCandidate, LearningItem, LearningStatus, ReasoningStep, StatusFilter, TurnUsage,
};

/// Everything the router sends the inference collaborator for one turn.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub question: String,
    /// Bounded to the most recent turns; never the whole conversation.
    pub history: Vec<ConversationTurn>,
    /// Advisory budget snapshot so the assistant can wrap up near the cap.
    pub budget_hint: BudgetStatus,
    /// Caller-pinned mode, forwarded verbatim.
    pub force_mode: Option<InvestigationMode>,
}

/// The inference collaborator's answer for one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub answer: String,
    /// Authoritative unless the caller pinned a mode.
    pub mode: InvestigationMode,
    pub reasoning: Vec<ReasoningStep>,
    pub usage: TurnUsage,
    #[serde(default)]
    pub learning_candidates: Vec<LearningCandidate>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

/// Failure kinds an inference call can surface. The router maps each to a
/// user-facing message; raw detail stays in server-side logs.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("authentication failure: {0}")]
    Auth(String),
    #[error("rate limited")]
    RateLimited,
}

/// Opaque LLM inference service: prompt + budget hint in, answer + trace +
/// usage out. The single long-latency suspension point in the engine;
/// cancellation is handled by the router racing this call against its token.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn invoke(&self, request: InferenceRequest)
        -> Result<InferenceResponse, InferenceError>;
}

/// Best-effort persistence for per-session budget state. Loss of this state
/// must only ever mean "start fresh", never a denied request.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_key: &str) -> anyhow::Result<Option<SessionBudgetState>>;
    async fn save(&self, session_key: &str, state: &SessionBudgetState) -> anyhow::Result<()>;
}

/// Durable term definitions with the scope precedence rule implemented once:
/// `lookup` checks the customer scope before falling back to global.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Case-insensitive exact-term lookup honoring scope precedence.
    async fn lookup(
        &self,
        term: &str,
        customer_id: Option<CustomerId>,
    ) -> anyhow::Result<Option<KnowledgeEntry>>;

    /// Case-insensitive exact-term lookup in exactly one scope.
    async fn lookup_scoped(
        &self,
        term: &str,
        scope: KnowledgeScope,
    ) -> anyhow::Result<Option<KnowledgeEntry>>;

    async fn write(&self, entry: &KnowledgeEntry) -> anyhow::Result<()>;

    /// All distinct terms across every scope, for similar-term surfacing.
    async fn all_terms(&self) -> anyhow::Result<Vec<String>>;
}

/// Persistence for the learning queue. Terminal transitions and their
/// knowledge writes happen as one unit of work; the guarded transitions
/// return whether the guard matched so races surface cleanly.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn insert(&self, item: &LearningItem) -> anyhow::Result<()>;

    async fn get(&self, item_id: &str) -> anyhow::Result<Option<LearningItem>>;

    async fn list(&self, filter: StatusFilter) -> anyhow::Result<Vec<LearningItem>>;

    /// Transition a `pending` item to a terminal status and, in the same
    /// unit of work, write the produced knowledge entry (if any). Returns
    /// `false` without side effects when the item was not `pending` (a
    /// concurrent reviewer got there first).
    async fn resolve_pending(
        &self,
        item_id: &str,
        to: LearningStatus,
        reviewer: &str,
        rejection_reason: Option<&str>,
        entry: Option<&KnowledgeEntry>,
    ) -> anyhow::Result<bool>;

    /// Batch merge: mark every `approved_customer` item for `term` as
    /// `merged`, delete the superseded customer-scope entries for the term,
    /// and write the single global entry - all in one unit of work. Returns
    /// the number of items merged; `0` means nothing was written at all.
    async fn merge_customer_approvals(
        &self,
        term: &str,
        reviewer: &str,
        entry: &KnowledgeEntry,
    ) -> anyhow::Result<u64>;

    /// How many times `term` has been rejected, for pattern surfacing.
    async fn rejection_count(&self, term: &str) -> anyhow::Result<u64>;
}
