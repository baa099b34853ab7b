use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines the errors produced by the simulator
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Malformed radial grid or root geometry
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Inconsistent soil, solver or coupling parameters
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Newton iterations exhausted even at the minimum substep
    ///
    /// `segment` is None when the failing micro-model is not owned by a coupling loop.
    #[error("Newton-Raphson did not converge (segment = {segment:?}, t = {t:e}, Δt = {dt:e}, iterations = {iterations})")]
    Convergence {
        segment: Option<usize>,
        t: f64,
        dt: f64,
        iterations: usize,
    },

    /// Zero pivot found while solving a linear system
    #[error("singular matrix: {0}")]
    SingularMatrix(&'static str),

    /// Failure reported by the macro soil model or the root network
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// Failure reading or writing files
    #[error("i/o: {0}")]
    Io(String),
}

impl Error {
    /// Attaches the segment index to a convergence error
    pub fn with_segment(self, index: usize) -> Self {
        match self {
            Error::Convergence { t, dt, iterations, .. } => Error::Convergence {
                segment: Some(index),
                t,
                dt,
                iterations,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Records a net-flux residual above the mass-balance tolerance
///
/// This is not fatal: the residual is carried into the next flux split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassBalanceWarning {
    /// Macro time step index
    pub step: usize,

    /// Time at the end of the step
    pub t: f64,

    /// Macro cell with the largest residual; None refers to the whole domain
    pub cell: Option<usize>,

    /// Net-flux residual (cm³)
    pub residual: f64,

    /// Tolerance that was exceeded (cm³)
    pub tolerance: f64,
}

impl fmt::Display for MassBalanceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell {
            Some(cell) => write!(
                f,
                "WARNING: step {} (t = {:e}): net-flux residual {:e} cm³ at cell {} exceeds {:e}",
                self.step, self.t, self.residual, cell, self.tolerance
            ),
            None => write!(
                f,
                "WARNING: step {} (t = {:e}): summed net-flux residual {:e} cm³ exceeds {:e}",
                self.step, self.t, self.residual, self.tolerance
            ),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{Error, MassBalanceWarning};

    #[test]
    fn with_segment_works() {
        let err = Error::Convergence {
            segment: None,
            t: 1.0,
            dt: 1e-10,
            iterations: 20,
        };
        assert_eq!(
            err.with_segment(7),
            Error::Convergence {
                segment: Some(7),
                t: 1.0,
                dt: 1e-10,
                iterations: 20
            }
        );
        let err = Error::SingularMatrix("zero pivot");
        assert_eq!(err.clone().with_segment(3), err);
    }

    #[test]
    fn display_works() {
        let err = Error::InvalidGeometry("inner radius must be smaller than outer radius".to_string());
        assert_eq!(
            format!("{}", err),
            "invalid geometry: inner radius must be smaller than outer radius"
        );
        let warning = MassBalanceWarning {
            step: 3,
            t: 0.5,
            cell: Some(2),
            residual: 0.25,
            tolerance: 1e-6,
        };
        assert_eq!(
            format!("{}", warning),
            "WARNING: step 3 (t = 5e-1): net-flux residual 2.5e-1 cm³ at cell 2 exceeds 1e-6"
        );
    }
}
