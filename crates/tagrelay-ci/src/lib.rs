//! tagrelay CI - local image builds
//!
//! Runs the phases of a rendered build spec on the local machine:
//! - Executes phases in order as `bash` scripts sharing shell state
//! - Stops at the first failing phase
//! - Publishes the image tag through `TagPublisher` once the gate passes

pub mod gate;
pub mod pipeline;
pub mod runner;
pub mod spec;
pub mod stage;

// Re-export key types
pub use gate::{CiGate, GateVerdict};
pub use pipeline::{BuildPipeline, PipelineResult};
pub use runner::{BuildSession, CiRunner, StageResult};
pub use spec::BuildJob;
pub use stage::{BuildPhase, PhaseConfig};
