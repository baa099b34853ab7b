//! Implements the coupling between the micro-models, the macro soil model and the root network

mod collaborators;
mod orchestrator;
mod root_geometry;
pub use crate::coupling::collaborators::*;
pub use crate::coupling::orchestrator::*;
pub use crate::coupling::root_geometry::*;
