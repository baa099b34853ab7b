/// Defines the smallest allowed dt_min (SolverConfig)
pub const CONTROL_MIN_DT_MIN: f64 = 1e-14;

/// Defines the smallest allowed tolerance (SolverConfig)
pub const CONTROL_MIN_TOL: f64 = 1e-15;

/// Defines the most negative pressure head returned by the inverse retention curve (cm)
pub const H_MIN: f64 = -1e8;

/// Defines the directory where the simulation result files are saved
pub const DEFAULT_OUT_DIR: &str = "/tmp/rhizosim/results";

/// Defines an auxiliary directory where the test result files are saved
pub const DEFAULT_TEST_DIR: &str = "/tmp/rhizosim/test";
