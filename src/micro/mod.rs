//! Implements the cylindrical (micro) models around root segments

mod boundary;
mod radial_grid;
mod richards_cyl;
mod solute;
mod water_solute;
pub use crate::micro::boundary::*;
pub use crate::micro::radial_grid::*;
pub use crate::micro::richards_cyl::*;
pub use crate::micro::solute::*;
pub use crate::micro::water_solute::*;
