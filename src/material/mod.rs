//! Implements soil material models

mod van_genuchten;
pub use crate::material::van_genuchten::*;
