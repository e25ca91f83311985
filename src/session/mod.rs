//! Scanning session lifecycle.
//!
//! [`SessionController`] is the only writer of [`SessionState`]. Start, stop,
//! permission answers, hardware faults and detection completions are all
//! serialized through one actor task, which also owns the live capture
//! session and releases it in reverse order of acquisition on every exit.

mod actor;
mod controller;
mod pipeline;
mod state;
#[cfg(test)]
mod tests;

pub use controller::{SessionController, SessionControllerBuilder};
pub use state::{SessionState, SessionStats, SessionStatsSnapshot, StartOutcome, StopOutcome};
