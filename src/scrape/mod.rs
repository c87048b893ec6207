//! Extraction engine and session supervisor.

pub mod engine;
mod supervisor;

pub use supervisor::{Supervisor, SupervisorConfig, SupervisorHandle};
