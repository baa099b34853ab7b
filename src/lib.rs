//! Root-soil interface simulator
//!
//! Solves the radial (cylindrical) Richards equation around each root segment and couples
//! these micro-models to a macroscopic soil model and to a xylem hydraulic network.

pub mod base;
pub mod coupling;
pub mod material;
pub mod micro;
pub mod prelude;
