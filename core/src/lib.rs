//! Core library entry point that wires together the arena subsystems.
//!
//! Each module is intentionally kept lightweight so that the boundaries
//! between responsibilities remain obvious when exploring the codebase:
//! - [`arena`] owns the broadcast/dispatch/arbitration orchestrator.
//! - [`providers`] holds the catalog, the instance registry, and credentials.
//! - [`api`] exposes the HTTP surface the arena UI talks to.
//! - [`db`] initialises the SQLite database and applies migrations.
//! - [`errors`] keeps the central error catalogue with stable codes.
//! - [`logging`] writes structured diagnostics to the event log table.

pub mod api;
pub mod arena;
pub mod db;
pub mod errors;
pub mod logging;
pub mod providers;
