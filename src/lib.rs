//! Comparative Financial Report Pipeline
//!
//! Turns two financial documents (current and prior period) into an
//! internally consistent comparative report:
//! - Generates a first draft with a remote generative model
//! - Verifies accounting identities deterministically (LLM excluded)
//! - Feeds failed checks back for a bounded number of correction rounds
//! - Talks to the model through a resilient client (cache, retry, breaker)
//!
//! CONTROL LOOP:
//! GENERATE → VERIFY → (CORRECT → VERIFY)* → DONE | CANCELLED

pub mod agent;
pub mod api;
pub mod client;
pub mod config;
pub mod corrector;
pub mod error;
pub mod generator;
pub mod models;
pub mod schema;
pub mod state;
pub mod verification;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{CancelToken, Orchestrator, PipelineConfig, RunContext};
pub use workflow::{GenerationPreferences, WorkflowClassifier};
