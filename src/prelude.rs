//! Makes available common structures needed to run a simulation
//!
//! You may write `use rhizosim::prelude::*` in your code and obtain
//! access to commonly used functionality.

pub use crate::base::{CouplingConfig, Error, FaceMean, RootInterface, SolverConfig, SplitRule, Transpiration};
pub use crate::base::{DEFAULT_OUT_DIR, DEFAULT_TEST_DIR};
pub use crate::coupling::{BucketSoil, Coupling, CouplingHistory, CouplingStatus, MacroSoil, RootGeometry};
pub use crate::coupling::{RootNetwork, XylemNetwork};
pub use crate::material::VanGenuchten;
pub use crate::micro::{AdvectionDiffusion, RadialGrid, RichardsCyl, SoluteBc, WaterBc, WaterSolute};
