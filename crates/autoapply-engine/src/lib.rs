//! Auto-apply automation engine.
//!
//! A rule (`automations` row) describes which catalog postings a user wants
//! to apply to and how many per UTC day. [`Engine::run_once`] matches unseen
//! approved postings against the rule, records them as submitted in the
//! user's ledger (`user_jobs`) and reports how much of the daily quota is
//! left.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
mod like;
pub mod matching;
pub mod quota;
pub mod rules;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use types::{LedgerStatus, ModerationStatus, RuleStatus, RunOutcome};
