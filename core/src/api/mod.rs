//! HTTP surface consumed by the arena UI. Versioned so the render layer can
//! evolve independently of the orchestrator.

pub mod v1;

pub use v1::{router, ApiState};
