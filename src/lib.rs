//! Governance engine for the freight-operations AI assistant.
//!
//! Three cooperating pieces sit between the dashboard and the LLM:
//!
//! - [`governor::SessionGovernor`] enforces per-session token, cost, and
//!   turn budgets, deciding up front whether an investigation may run.
//! - [`router::InvestigationRouter`] owns the investigation lifecycle:
//!   admission, dispatch to the inference collaborator, cancellation, and
//!   the reasoning trace attached to every answer.
//! - [`learning::LearningQueue`] triages terminology the assistant infers
//!   mid-conversation into a human-reviewed, tenant-aware knowledge base.
//!
//! Persistence lives behind the traits in [`traits`]; [`state::SqliteStore`]
//! is the bundled SQLite implementation.

pub mod config;
pub mod conversation;
pub mod error;
pub mod governor;
pub mod learning;
pub mod router;
pub mod state;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::GovernanceConfig;
pub use error::{GovernanceError, Result};
pub use governor::SessionGovernor;
pub use learning::LearningQueue;
pub use router::InvestigationRouter;
pub use state::SqliteStore;
