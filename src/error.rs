//! Error taxonomy for the governance engine.
//!
//! Every variant carries full internal detail for server-side logs, while
//! `user_message` produces the plain-language string shown to the user.
//! The two are kept strictly separate so internal detail never leaks.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Admission denied by the session governor. Recoverable: the user can
    /// clear the conversation or wait for session expiry.
    #[error("budget exhausted: {reason}")]
    BudgetExhausted { reason: String },

    /// The inference collaborator could not be reached.
    #[error("inference transport failure: {detail}")]
    Transport { detail: String },

    /// The inference collaborator rejected our credentials.
    #[error("inference auth failure: {detail}")]
    Auth { detail: String },

    /// The inference collaborator is throttling us.
    #[error("inference rate limited")]
    RateLimited,

    /// The in-flight investigation was cancelled before completion.
    #[error("investigation cancelled")]
    Cancelled,

    /// An operation was attempted against an item that is no longer in the
    /// state the operation requires (e.g. approving an already-reviewed
    /// learning item). A programming or race error; no side effects occur.
    #[error("invalid state transition: {entity} {id} is {state}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        state: String,
    },

    /// Referenced item does not exist.
    #[error("unknown {entity}: {id}")]
    Unknown { entity: &'static str, id: String },

    /// A customer-scoped approval was requested for an item that has no
    /// originating customer and no explicit target.
    #[error("learning item {item_id} has no customer scope and none was given")]
    NoCustomerScope { item_id: String },

    /// Storage-layer failure. Internal detail stays in the error chain.
    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for GovernanceError {
    fn from(err: anyhow::Error) -> Self {
        GovernanceError::Storage(err)
    }
}

impl GovernanceError {
    /// Plain-language message safe to show to end users. Never includes
    /// transport bodies, SQL, or other internal detail.
    pub fn user_message(&self) -> String {
        match self {
            GovernanceError::BudgetExhausted { reason } => format!(
                "This conversation has used up its budget ({}). \
                 Clear the conversation to keep going.",
                reason
            ),
            GovernanceError::Transport { .. } => {
                "I couldn't reach the assistant service. Your question was kept - \
                 please try again."
                    .to_string()
            }
            GovernanceError::Auth { .. } => {
                "The assistant service isn't accepting our credentials right now. \
                 Please contact an administrator."
                    .to_string()
            }
            GovernanceError::RateLimited => {
                "The assistant is handling a lot of requests right now. \
                 Please try again in a moment."
                    .to_string()
            }
            GovernanceError::Cancelled => "Investigation stopped.".to_string(),
            GovernanceError::InvalidStateTransition { .. } => {
                "This item has already been reviewed.".to_string()
            }
            GovernanceError::Unknown { .. } => "That item no longer exists.".to_string(),
            GovernanceError::NoCustomerScope { .. } => {
                "Pick a customer to scope this definition to.".to_string()
            }
            GovernanceError::Storage(_) => {
                "Something went wrong saving that. If it keeps happening, \
                 contact an administrator."
                    .to_string()
            }
        }
    }

    /// Whether retrying the same operation can succeed without other action.
    /// Storage errors are excluded: constraint violations fail the same way
    /// every time, so "try again" would be misleading.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GovernanceError::Transport { .. } | GovernanceError::RateLimited
        )
    }
}
