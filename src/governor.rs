//! Session resource governor: admission control over tokens, cost, and
//! turn count for one assistant session.
//!
//! All policy math is pure functions over [`SessionBudgetState`] so it is
//! unit-testable without storage. [`SessionGovernor`] owns the mutable
//! state for one session and persists it best-effort: losing persisted
//! state only ever means "start fresh", never a denied request.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{BudgetPolicy, PricingConfig};
use crate::traits::SessionStore;
use crate::types::{BudgetStatus, TurnUsage};

/// Budget counters for one active assistant session. Counters only ever
/// increase via `apply_usage`; `fresh()` is the only way back to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBudgetState {
    pub session_id: String,
    pub tokens_used: u64,
    pub cost_used_usd: f64,
    pub turn_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionBudgetState {
    pub fn fresh() -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            tokens_used: 0,
            cost_used_usd: 0.0,
            turn_count: 0,
            started_at: now,
            last_activity_at: now,
        }
    }

    pub fn is_expired(&self, ttl_minutes: u32, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at >= Duration::minutes(i64::from(ttl_minutes))
    }

    /// Record one completed turn's usage. Monotonic: nothing in here can
    /// lower a counter.
    pub fn apply_usage(&mut self, usage: &TurnUsage, now: DateTime<Utc>) {
        self.tokens_used += usage.total_tokens();
        self.cost_used_usd += usage.cost_usd;
        self.turn_count += 1;
        self.last_activity_at = now;
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Admission {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Pure admission decision: may a turn of `estimated_tokens` start now?
pub fn evaluate_admission(
    state: &SessionBudgetState,
    policy: &BudgetPolicy,
    pricing: &PricingConfig,
    estimated_tokens: u64,
) -> Admission {
    if state.turn_count >= policy.max_turns {
        return Admission::deny(format!(
            "turn limit reached: {} of {} turns used",
            state.turn_count, policy.max_turns
        ));
    }
    if state.tokens_used + estimated_tokens > policy.max_tokens {
        return Admission::deny(format!(
            "token budget exceeded: {} used plus about {} needed is over the {} limit",
            state.tokens_used, estimated_tokens, policy.max_tokens
        ));
    }
    if state.cost_used_usd + pricing.estimated_cost(estimated_tokens) > policy.max_cost_usd {
        return Admission::deny(format!(
            "cost budget exceeded: ${:.2} used of a ${:.2} limit",
            state.cost_used_usd, policy.max_cost_usd
        ));
    }
    Admission::allow()
}

/// Pure derived view of budget consumption. The status message is advisory
/// only; `evaluate_admission` is the sole gate.
pub fn budget_status(state: &SessionBudgetState, policy: &BudgetPolicy) -> BudgetStatus {
    let token_percent = state.tokens_used as f64 * 100.0 / policy.max_tokens.max(1) as f64;
    let cost_percent = state.cost_used_usd * 100.0 / policy.max_cost_usd.max(f64::MIN_POSITIVE);
    let turn_percent = f64::from(state.turn_count) * 100.0 / f64::from(policy.max_turns.max(1));
    let percent_used = token_percent.max(cost_percent).max(turn_percent);

    let status_message = if percent_used >= 100.0 {
        Some(
            "I've gathered enough for this session. Want to dig deeper? \
             Clear the conversation to start fresh."
                .to_string(),
        )
    } else if percent_used >= f64::from(policy.warn_threshold_percent) {
        Some(
            "I'm getting close to this session's budget, so I'll start wrapping up."
                .to_string(),
        )
    } else {
        None
    };

    BudgetStatus {
        session_id: state.session_id.clone(),
        tokens_used: state.tokens_used,
        cost_used_usd: state.cost_used_usd,
        turn_count: state.turn_count,
        percent_used,
        status_message,
    }
}

/// Owns one session's budget state. Counters are mutated only through this
/// API; the router is the only caller of `record_usage`.
pub struct SessionGovernor {
    store: Arc<dyn SessionStore>,
    policy: BudgetPolicy,
    pricing: PricingConfig,
    ttl_minutes: u32,
    session_key: String,
    state: RwLock<Option<SessionBudgetState>>,
}

impl SessionGovernor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        policy: BudgetPolicy,
        pricing: PricingConfig,
        ttl_minutes: u32,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            policy,
            pricing,
            ttl_minutes,
            session_key: session_key.into(),
            state: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// Current state, loading from the store on first use. Expired, missing,
    /// or unreadable persisted state degrades to a fresh session.
    async fn current_state(&self) -> SessionBudgetState {
        let mut guard = self.state.write().await;
        let now = Utc::now();

        if let Some(state) = guard.as_ref() {
            if !state.is_expired(self.ttl_minutes, now) {
                return state.clone();
            }
            debug!(session_key = %self.session_key, "Cached session expired, starting fresh");
        } else {
            match self.store.load(&self.session_key).await {
                Ok(Some(state)) if !state.is_expired(self.ttl_minutes, now) => {
                    *guard = Some(state.clone());
                    return state;
                }
                Ok(Some(_)) => {
                    debug!(session_key = %self.session_key, "Persisted session expired");
                }
                Ok(None) => {}
                Err(e) => {
                    // Admission control degrades to "allow", never blocks on
                    // storage trouble.
                    warn!(
                        session_key = %self.session_key,
                        error = %e,
                        "Failed to load session state, starting fresh"
                    );
                }
            }
        }

        let fresh = SessionBudgetState::fresh();
        self.save_best_effort(&fresh).await;
        *guard = Some(fresh.clone());
        fresh
    }

    /// Admission check for a turn expected to consume `estimated_tokens`.
    /// Must be consulted before every dispatch to the inference collaborator.
    pub async fn can_proceed(&self, estimated_tokens: u64) -> Admission {
        let state = self.current_state().await;
        evaluate_admission(&state, &self.policy, &self.pricing, estimated_tokens)
    }

    /// Record usage for a turn that already completed. Infallible to the
    /// caller: the usage happened, recording cannot be rejected. Usage
    /// arriving for an expired session is a race; it is logged and dropped
    /// without side effects.
    pub async fn record_usage(&self, usage: &TurnUsage) {
        // Populate the cache first so a cold governor does not mistake
        // "never loaded" for "expired".
        let _ = self.current_state().await;

        let mut guard = self.state.write().await;
        let now = Utc::now();

        let expired = guard
            .as_ref()
            .map(|s| s.is_expired(self.ttl_minutes, now))
            .unwrap_or(true);
        if expired {
            // Invalid-state race: log and drop, leaving both the cache and
            // the store untouched. The next read starts the fresh session.
            warn!(
                session_key = %self.session_key,
                tokens = usage.total_tokens(),
                "Usage reported against an expired session; dropped"
            );
            return;
        }

        let state = guard.as_mut().unwrap();
        state.apply_usage(usage, now);
        debug!(
            session_key = %self.session_key,
            tokens_used = state.tokens_used,
            turn_count = state.turn_count,
            "Recorded turn usage"
        );
        let snapshot = state.clone();
        drop(guard);
        self.save_best_effort(&snapshot).await;
    }

    pub async fn status(&self) -> BudgetStatus {
        let state = self.current_state().await;
        budget_status(&state, &self.policy)
    }

    /// User-initiated "clear conversation": fresh session id, zeroed
    /// counters, restarted TTL clock.
    pub async fn reset(&self) -> BudgetStatus {
        let fresh = SessionBudgetState::fresh();
        info!(
            session_key = %self.session_key,
            session_id = %fresh.session_id,
            "Session budget reset"
        );
        self.save_best_effort(&fresh).await;
        let mut guard = self.state.write().await;
        *guard = Some(fresh.clone());
        budget_status(&fresh, &self.policy)
    }

    async fn save_best_effort(&self, state: &SessionBudgetState) {
        if let Err(e) = self.store.save(&self.session_key, state).await {
            warn!(
                session_key = %self.session_key,
                error = %e,
                "Failed to persist session state"
            );
        }
    }
}
