use super::{Error, CONTROL_MIN_DT_MIN, CONTROL_MIN_TOL};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Selects how the conductivity at a face between two cells is averaged
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceMean {
    /// K̄ = (Kᵢ + Kⱼ) / 2
    Arithmetic,

    /// K̄ = 2 Kᵢ Kⱼ / (Kᵢ + Kⱼ)
    Harmonic,
}

impl FaceMean {
    /// Returns the face conductivity and its derivatives with respect to (k_left, k_right)
    #[inline]
    pub fn eval(&self, k_left: f64, k_right: f64) -> (f64, f64, f64) {
        match self {
            FaceMean::Arithmetic => (0.5 * (k_left + k_right), 0.5, 0.5),
            FaceMean::Harmonic => {
                let sum = k_left + k_right;
                if sum <= 0.0 {
                    return (0.0, 0.0, 0.0);
                }
                let kf = 2.0 * k_left * k_right / sum;
                let d_left = 2.0 * k_right * k_right / (sum * sum);
                let d_right = 2.0 * k_left * k_left / (sum * sum);
                (kf, d_left, d_right)
            }
        }
    }
}

/// Holds the options controlling the nonlinear solution of a micro-model
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum number of Newton iterations per substep
    pub n_max_iterations: usize,

    /// Tolerance on the scaled update: max |δhᵢ| / (1 + |hᵢ|)
    pub tol_rel_dh: f64,

    /// Tolerance on the mass residual expressed as water content: max |Rᵢ| Δt / Vᵢ
    pub tol_residual: f64,

    /// Initial substep
    pub dt_ini: f64,

    /// Minimum allowed substep; below it the solver gives up
    pub dt_min: f64,

    /// Factor applied to the substep after a run of successful substeps
    pub dt_growth: f64,

    /// Number of consecutive successful substeps before growing the substep
    pub n_grow_after: usize,

    /// Averaging of the conductivity at faces
    pub face_mean: FaceMean,

    /// Verbose mode during substeps
    pub verbose_timesteps: bool,

    /// Verbose mode during iterations
    pub verbose_iterations: bool,
}

impl SolverConfig {
    /// Allocates a new instance with default values
    pub fn new() -> Self {
        SolverConfig {
            n_max_iterations: 20,
            tol_rel_dh: 1e-9,
            tol_residual: 1e-10,
            dt_ini: 1e-3,
            dt_min: 1e-10,
            dt_growth: 1.25,
            n_grow_after: 3,
            face_mean: FaceMean::Arithmetic,
            verbose_timesteps: false,
            verbose_iterations: false,
        }
    }

    /// Sets the maximum number of Newton iterations
    pub fn set_n_max_iterations(&mut self, value: usize) -> Result<&mut Self, Error> {
        if value < 1 {
            return Err(Error::InvalidParameter("n_max_iterations must be ≥ 1".to_string()));
        }
        self.n_max_iterations = value;
        Ok(self)
    }

    /// Sets the tolerances for the update norm and for the mass residual
    pub fn set_tolerances(&mut self, tol_rel_dh: f64, tol_residual: f64) -> Result<&mut Self, Error> {
        if tol_rel_dh < CONTROL_MIN_TOL || tol_residual < CONTROL_MIN_TOL {
            return Err(Error::InvalidParameter(format!(
                "tolerances must be ≥ {:e}",
                CONTROL_MIN_TOL
            )));
        }
        self.tol_rel_dh = tol_rel_dh;
        self.tol_residual = tol_residual;
        Ok(self)
    }

    /// Sets the initial and minimum substeps
    pub fn set_dt_ini_min(&mut self, dt_ini: f64, dt_min: f64) -> Result<&mut Self, Error> {
        if dt_min < CONTROL_MIN_DT_MIN || dt_ini < dt_min {
            return Err(Error::InvalidParameter(
                "substeps must satisfy dt_ini ≥ dt_min ≥ CONTROL_MIN_DT_MIN".to_string(),
            ));
        }
        self.dt_ini = dt_ini;
        self.dt_min = dt_min;
        Ok(self)
    }

    /// Sets the averaging of the conductivity at faces
    pub fn set_face_mean(&mut self, face_mean: FaceMean) -> Result<&mut Self, Error> {
        self.face_mean = face_mean;
        Ok(self)
    }

    /// Sets the verbose flags
    pub fn set_verbose(&mut self, timesteps: bool, iterations: bool) -> Result<&mut Self, Error> {
        self.verbose_timesteps = timesteps;
        self.verbose_iterations = iterations;
        Ok(self)
    }

    /// Validates all data
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self) -> Option<String> {
        if self.n_max_iterations < 1 {
            return Some(format!(
                "n_max_iterations = {} is incorrect; it must be ≥ 1",
                self.n_max_iterations
            ));
        }
        if self.tol_rel_dh < CONTROL_MIN_TOL {
            return Some(format!(
                "tol_rel_dh = {:?} is incorrect; it must be ≥ {:e}",
                self.tol_rel_dh, CONTROL_MIN_TOL
            ));
        }
        if self.tol_residual < CONTROL_MIN_TOL {
            return Some(format!(
                "tol_residual = {:?} is incorrect; it must be ≥ {:e}",
                self.tol_residual, CONTROL_MIN_TOL
            ));
        }
        if self.dt_min < CONTROL_MIN_DT_MIN {
            return Some(format!(
                "dt_min = {:?} is incorrect; it must be ≥ {:e}",
                self.dt_min, CONTROL_MIN_DT_MIN
            ));
        }
        if self.dt_ini < self.dt_min {
            return Some(format!(
                "dt_ini = {:?} is incorrect; it must be ≥ dt_min = {:?}",
                self.dt_ini, self.dt_min
            ));
        }
        if self.dt_growth < 1.0 {
            return Some(format!("dt_growth = {:?} is incorrect; it must be ≥ 1.0", self.dt_growth));
        }
        None // all good
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Defines the potential transpiration (collar demand) as a function of time
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Transpiration {
    /// Constant rate (cm³/day)
    Constant(f64),

    /// Daily cycle v·(sin(2πt − π/2) + 1) with mean v (cm³/day)
    Sinusoidal(f64),
}

impl Transpiration {
    /// Returns the potential transpiration at time t (days)
    pub fn at(&self, t: f64) -> f64 {
        match *self {
            Transpiration::Constant(v) => v,
            Transpiration::Sinusoidal(v) => v * (f64::sin(2.0 * PI * t - 0.5 * PI) + 1.0),
        }
    }
}

/// Selects how a macro-cell flux is shared among the segments of that cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitRule {
    /// Proportional to the soil cylinder volume π(r_out² − r_in²)·l
    Volume,

    /// Proportional to the outer surface 2π·r_out·l
    Surface,

    /// Proportional to the segment length
    Length,
}

/// Selects the exchange law between the xylem and the root surface of the micro-models
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootInterface {
    /// The micro-models extract the segment fluxes computed by the root network
    ///
    /// The inner boundary is a limited flux (`FluxOut` with the wilting point as critical head),
    /// thus the ledger matches the network uptake unless the soil cannot deliver the flux.
    NetworkFlux,

    /// The micro-models exchange `kr (p_mid − h_b)` with the xylem during the step
    ///
    /// The network uses the same law with the head of the first cylinder cell, but the heads
    /// evolve during the micro solve, thus the uptake lags the network by one step.
    RootSystem,
}

/// Holds the options of the coupling loop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingConfig {
    /// Number of macro time steps
    pub n_steps: usize,

    /// Macro time step (days)
    pub dt: f64,

    /// Potential transpiration
    pub transpiration: Transpiration,

    /// Limiting xylem pressure at the collar (cm)
    pub wilting_point: f64,

    /// Radial conductivity of the root surface (1/day)
    pub kr: f64,

    /// Number of nodes of each cylindrical grid (ndof = nc − 1)
    pub nc: usize,

    /// Base of the geometric node spacing
    pub log_base: f64,

    /// Split rule of the macro net-flux residual among segments
    pub split: SplitRule,

    /// Exchange law at the root surface
    pub interface: RootInterface,

    /// Minimum number of micro substeps per macro step (max_substep = dt / micro_substeps)
    pub micro_substeps: usize,

    /// Tolerance for the net-flux residual per macro cell (cm³)
    pub mass_balance_tol: f64,

    /// Cell checked for early termination; None means the collar cell
    pub sentinel_cell: Option<usize>,

    /// Number of worker threads; 0 lets rayon decide
    pub n_threads: usize,

    /// Prints a line per macro step
    pub verbose: bool,

    /// Options of the micro-model solver
    pub solver: SolverConfig,
}

impl CouplingConfig {
    /// Allocates a new instance with default values
    pub fn new() -> Self {
        CouplingConfig {
            n_steps: 216,
            dt: 3.0 / 216.0,
            transpiration: Transpiration::Sinusoidal(6.4),
            wilting_point: -15000.0,
            kr: 1.728e-4,
            nc: 10,
            log_base: 1.5,
            split: SplitRule::Volume,
            interface: RootInterface::NetworkFlux,
            micro_substeps: 10,
            mass_balance_tol: 1e-6,
            sentinel_cell: None,
            n_threads: 0,
            verbose: false,
            solver: SolverConfig::new(),
        }
    }

    /// Sets the number of steps and the macro time step
    pub fn set_time_stepping(&mut self, n_steps: usize, dt: f64) -> Result<&mut Self, Error> {
        if dt <= 0.0 {
            return Err(Error::InvalidParameter("macro time step must be > 0.0".to_string()));
        }
        self.n_steps = n_steps;
        self.dt = dt;
        Ok(self)
    }

    /// Sets the potential transpiration
    pub fn set_transpiration(&mut self, transpiration: Transpiration) -> Result<&mut Self, Error> {
        self.transpiration = transpiration;
        Ok(self)
    }

    /// Sets the wilting point (cm)
    pub fn set_wilting_point(&mut self, value: f64) -> Result<&mut Self, Error> {
        if value >= 0.0 {
            return Err(Error::InvalidParameter("wilting point must be < 0.0".to_string()));
        }
        self.wilting_point = value;
        Ok(self)
    }

    /// Sets the radial conductivity of the root surface (1/day)
    pub fn set_kr(&mut self, value: f64) -> Result<&mut Self, Error> {
        if value < 0.0 {
            return Err(Error::InvalidParameter("kr must be ≥ 0.0".to_string()));
        }
        self.kr = value;
        Ok(self)
    }

    /// Sets the cylindrical grid resolution
    pub fn set_cylinder_grid(&mut self, nc: usize, log_base: f64) -> Result<&mut Self, Error> {
        if nc < 2 {
            return Err(Error::InvalidParameter("nc must be ≥ 2".to_string()));
        }
        if log_base <= 1.0 {
            return Err(Error::InvalidParameter("log_base must be > 1.0".to_string()));
        }
        self.nc = nc;
        self.log_base = log_base;
        Ok(self)
    }

    /// Sets the split rule
    pub fn set_split(&mut self, split: SplitRule) -> Result<&mut Self, Error> {
        self.split = split;
        Ok(self)
    }

    /// Sets the exchange law at the root surface
    pub fn set_interface(&mut self, interface: RootInterface) -> Result<&mut Self, Error> {
        self.interface = interface;
        Ok(self)
    }

    /// Sets the minimum number of micro substeps per macro step
    pub fn set_micro_substeps(&mut self, value: usize) -> Result<&mut Self, Error> {
        if value < 1 {
            return Err(Error::InvalidParameter("micro_substeps must be ≥ 1".to_string()));
        }
        self.micro_substeps = value;
        Ok(self)
    }

    /// Sets the number of worker threads (0 lets rayon decide)
    pub fn set_n_threads(&mut self, value: usize) -> Result<&mut Self, Error> {
        self.n_threads = value;
        Ok(self)
    }

    /// Validates all data
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self) -> Option<String> {
        if self.dt <= 0.0 {
            return Some(format!("dt = {:?} is incorrect; it must be > 0.0", self.dt));
        }
        if self.wilting_point >= 0.0 {
            return Some(format!(
                "wilting_point = {:?} is incorrect; it must be < 0.0",
                self.wilting_point
            ));
        }
        if self.kr < 0.0 {
            return Some(format!("kr = {:?} is incorrect; it must be ≥ 0.0", self.kr));
        }
        if self.nc < 2 {
            return Some(format!("nc = {} is incorrect; it must be ≥ 2", self.nc));
        }
        if self.log_base <= 1.0 {
            return Some(format!("log_base = {:?} is incorrect; it must be > 1.0", self.log_base));
        }
        if self.micro_substeps < 1 {
            return Some(format!("micro_substeps = {} is incorrect; it must be ≥ 1", self.micro_substeps));
        }
        if self.mass_balance_tol <= 0.0 {
            return Some(format!(
                "mass_balance_tol = {:?} is incorrect; it must be > 0.0",
                self.mass_balance_tol
            ));
        }
        self.solver.validate()
    }
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CouplingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coupling configuration\n")?;
        write!(f, "======================\n")?;
        write!(f, "n_steps = {:?}\n", self.n_steps)?;
        write!(f, "dt = {:?}\n", self.dt)?;
        write!(f, "transpiration = {:?}\n", self.transpiration)?;
        write!(f, "wilting_point = {:?}\n", self.wilting_point)?;
        write!(f, "kr = {:?}\n", self.kr)?;
        write!(f, "nc = {:?}\n", self.nc)?;
        write!(f, "log_base = {:?}\n", self.log_base)?;
        write!(f, "split = {:?}\n", self.split)?;
        write!(f, "interface = {:?}\n", self.interface)?;
        write!(f, "micro_substeps = {:?}\n", self.micro_substeps)?;
        write!(f, "mass_balance_tol = {:?}\n", self.mass_balance_tol)?;
        write!(f, "sentinel_cell = {:?}\n", self.sentinel_cell)?;
        write!(f, "n_threads = {:?}\n", self.n_threads)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
