/// Stage lattice of a module
pub mod module_state;

/// Errors and warnings attached to modules
pub mod diagnostics;

/// Per-module record
pub mod module_record;

/// Domain events
pub mod events;

/// Required-module edges and their reverse index
pub mod dependency_graph;

/// Module registry and invalidation cascades
pub mod registry;

/// Guarded mutation of module records
pub mod state_manager;
