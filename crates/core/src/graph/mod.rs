//! Dependency graph shared by the editing stage and the export orchestrator.

mod dependency;

pub use dependency::{CycleError, DependencyGraph, EdgeInsertion, EdgeRejection};
