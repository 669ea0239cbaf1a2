//! Staged data acquisition: session → application → model → layout →
//! render, with every stage tagged by the generation of its input.

pub mod controller;
mod generation;
pub mod stages;
pub mod state;
pub mod status;

pub use controller::{PipelineController, PipelineInputs, PipelineSnapshot, StageSnapshot};
pub use generation::Generation;
pub use state::{StageError, StageKind, StagePhase};
pub use status::{project_status, PipelineStatus, StatusInputs};
