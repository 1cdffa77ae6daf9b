//! Agent Memory
//!
//! The reasoning log is the agent's only memory. It is owned by a single run
//! and replayed in full to the backend on every decision.

pub mod context;
pub mod store;

pub use context::render_replay;
pub use store::ReasoningLog;
