//! Testing utilities for the Lemma verification platform.
//!
//! This crate provides scripted service executors, a recording event log,
//! stage-lattice assertions and test logging setup.

pub mod assertions;
pub mod event_log;
pub mod executors;
pub mod logging;

/// Re-export commonly used types for convenience
pub use mockall;

pub use assertions::{assert_lattice_invariant, assert_registry_lattice, check_lattice, LatticeViolation};
pub use event_log::RecordingEventLog;
pub use executors::{Behavior, EmptyExistenceChecker, Gate, PipelineExecutor, ScriptedExecutor};
pub use logging::init_test_logging;
