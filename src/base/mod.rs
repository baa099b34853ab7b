//! Implements the base structures: errors, configuration, and small linear algebra

mod config;
mod constants;
mod error;
mod linalg;
pub use crate::base::config::*;
pub use crate::base::constants::*;
pub use crate::base::error::*;
pub use crate::base::linalg::*;
