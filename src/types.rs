//! Core domain types shared across the governance engine.
//!
//! Status and step kinds are closed enums with exhaustive matching at every
//! consumer, so a new variant is a compile error rather than a silently
//! ignored string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant identifier, as issued by the dashboard's customer directory.
pub type CustomerId = i64;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// How deeply a question was investigated. The inference collaborator is
/// authoritative; the router only honors a caller-forced override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationMode {
    Quick,
    Deep,
}

impl InvestigationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationMode::Quick => "quick",
            InvestigationMode::Deep => "deep",
        }
    }
}

/// The kind of a single reasoning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Routing,
    Thinking,
    ToolCall,
    ToolResult,
}

/// One entry in an assistant turn's reasoning trace. Steps are produced in
/// execution order and are never reordered or deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub kind: StepKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ReasoningStep {
    pub fn new(kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool(kind: StepKind, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// Token/cost/latency usage reported by the inference collaborator for one
/// completed turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

impl TurnUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One turn in a conversation. Turns are append-only: never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Assistant turns only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<InvestigationMode>,
    #[serde(default)]
    pub reasoning: Vec<ReasoningStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TurnUsage>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: TurnRole::User,
            content: content.into(),
            created_at: Utc::now(),
            mode: None,
            reasoning: Vec::new(),
            usage: None,
            follow_ups: Vec::new(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        mode: InvestigationMode,
        reasoning: Vec<ReasoningStep>,
        usage: TurnUsage,
        follow_ups: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: TurnRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            mode: Some(mode),
            reasoning,
            usage: Some(usage),
            follow_ups,
        }
    }
}

/// Advisory view of a session's budget consumption. `status_message` nudges
/// the user near the cap; admission itself is decided only by `can_proceed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub session_id: String,
    pub tokens_used: u64,
    pub cost_used_usd: f64,
    pub turn_count: u32,
    /// `max(token%, cost%, turn%)`, uncapped (can exceed 100).
    pub percent_used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Whether a knowledge fact applies to one tenant or to all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "customer_id")]
pub enum KnowledgeScope {
    Global,
    Customer(CustomerId),
}

impl KnowledgeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeScope::Global => "global",
            KnowledgeScope::Customer(_) => "customer",
        }
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        match self {
            KnowledgeScope::Global => None,
            KnowledgeScope::Customer(id) => Some(*id),
        }
    }
}

/// A durable, reviewer-approved term definition. Customer-scoped entries
/// take lookup precedence over global ones for that customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub term: String,
    pub definition: String,
    pub category: String,
    pub scope: KnowledgeScope,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(
        term: impl Into<String>,
        definition: impl Into<String>,
        category: impl Into<String>,
        scope: KnowledgeScope,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            term: term.into(),
            definition: definition.into(),
            category: category.into(),
            scope,
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// Scope the assistant suggested for a learning candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeHint {
    Global,
    Customer,
}

impl ScopeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeHint::Global => "global",
            ScopeHint::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(ScopeHint::Global),
            "customer" => Some(ScopeHint::Customer),
            _ => None,
        }
    }
}

/// Disposition of a learning queue item. Everything except `Pending` is
/// terminal; `Merged` is reachable only from `ApprovedCustomer` via the
/// batch promote-to-global operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStatus {
    Pending,
    ApprovedGlobal,
    ApprovedCustomer,
    Rejected,
    Merged,
}

impl LearningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStatus::Pending => "pending",
            LearningStatus::ApprovedGlobal => "approved_global",
            LearningStatus::ApprovedCustomer => "approved_customer",
            LearningStatus::Rejected => "rejected",
            LearningStatus::Merged => "merged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LearningStatus::Pending),
            "approved_global" => Some(LearningStatus::ApprovedGlobal),
            "approved_customer" => Some(LearningStatus::ApprovedCustomer),
            "rejected" => Some(LearningStatus::Rejected),
            "merged" => Some(LearningStatus::Merged),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LearningStatus::Pending)
    }
}

/// Filter for listing the review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(LearningStatus),
}

/// A knowledge fact the inference collaborator proposed during a turn.
/// This is the provider-facing payload; `submit` turns it into a
/// [`LearningItem`] with conflict flags computed at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningCandidate {
    pub term: String,
    pub original_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_explanation: Option<String>,
    pub ai_interpretation: String,
    pub suggested_scope: ScopeHint,
    pub suggested_category: String,
    /// 0.0 - 1.0
    pub confidence_score: f64,
    /// None implies a global-only candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
}

/// A candidate knowledge fact awaiting human disposition. Never deleted,
/// only transitioned, to preserve the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningItem {
    pub id: String,
    pub term: String,
    pub original_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_explanation: Option<String>,
    pub ai_interpretation: String,
    pub suggested_scope: ScopeHint,
    pub suggested_category: String,
    pub confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    /// Computed once, at submission; never updated retroactively.
    pub conflicts_with_global: bool,
    pub conflicts_with_customer: bool,
    #[serde(default)]
    pub similar_existing_terms: Vec<String>,
    pub status: LearningStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Per-status counts for the review queue header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueTallies {
    pub pending: usize,
    pub approved_global: usize,
    pub approved_customer: usize,
    pub rejected: usize,
    pub merged: usize,
}
