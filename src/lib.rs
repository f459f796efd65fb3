//! convoy — a service lifecycle supervisor.
//!
//! Starts a set of independent long-running services (native processes and
//! container instances) with dependency ordering and readiness constraints,
//! then guarantees all of them are torn down exactly once, cleanly, whatever
//! ends the run: normal completion, a startup failure, or an external signal.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod launcher;
pub mod orchestrator;
pub mod platform;
pub mod probe;
pub mod ui;
