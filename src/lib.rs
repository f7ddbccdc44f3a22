// ABOUTME: Library root for the convergence engine - exposes public types for embedding.
// ABOUTME: The reconciliation core is engine-agnostic; `engine` carries the only I/O boundary.

pub mod convergence;
pub mod engine;
pub mod error;
pub mod project;
pub mod types;
