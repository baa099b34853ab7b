use rhizosim::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use structopt::StructOpt;

/// Command line options
#[derive(StructOpt, Debug)]
#[structopt(name = "rhizosim", about = "Simulates water flow around roots with cylindrical micro-models")]
enum Options {
    /// Runs the single-cylinder drying benchmark and writes the head profiles
    Cylinder {
        /// Output CSV file
        #[structopt(long, parse(from_os_str))]
        out: Option<PathBuf>,
    },

    /// Runs a single root in a bucket soil coupled to a xylem network
    Coupled {
        /// JSON file with the scenario
        #[structopt(long, parse(from_os_str))]
        scenario: Option<PathBuf>,

        /// Output path without extension (writes .csv and .json)
        #[structopt(long)]
        out: Option<String>,
    },
}

/// Holds the data of a coupled scenario
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct Scenario {
    /// van Genuchten parameters [θr, θs, α, n, Ks]
    soil: [f64; 5],
    domain_min: [f64; 3],
    domain_max: [f64; 3],
    cells: [usize; 3],
    /// Head at z = 0 (hydrostatic initial condition)
    initial_head: f64,
    root_top: [f64; 3],
    root_length: f64,
    n_segments: usize,
    root_radius: f64,
    /// Axial conductance of the xylem (cm³/day)
    kx: f64,
    coupling: CouplingConfig,
}

impl Default for Scenario {
    fn default() -> Self {
        Scenario {
            soil: [0.08, 0.43, 0.04, 1.6, 50.0],
            domain_min: [-1.0, -1.0, -15.0],
            domain_max: [1.0, 1.0, 0.0],
            cells: [1, 1, 15],
            initial_head: -659.8,
            root_top: [0.0, 0.0, -0.5],
            root_length: 14.0,
            n_segments: 28,
            root_radius: 0.05,
            kx: 4.32e-2,
            coupling: CouplingConfig::new(),
        }
    }
}

fn main() -> Result<(), Error> {
    match Options::from_args() {
        Options::Cylinder { out } => {
            let path = out.unwrap_or_else(|| Path::new(DEFAULT_OUT_DIR).join("cylinder.csv"));
            run_cylinder(&path)
        }
        Options::Coupled { scenario, out } => {
            let scenario = match scenario {
                Some(path) => {
                    let file = File::open(&path)?;
                    serde_json::from_reader(BufReader::new(file))?
                }
                None => Scenario::default(),
            };
            let stem = out.unwrap_or_else(|| format!("{}/coupled", DEFAULT_OUT_DIR));
            run_coupled(&scenario, &stem)
        }
    }
}

/// Dries a loam cylinder with a constant root uptake limited at -15000 cm
fn run_cylinder(path: &Path) -> Result<(), Error> {
    let grid = RadialGrid::linear(0.02, 0.6, 101)?;
    let dx = grid.inner_spacing();
    let soil = Arc::new(VanGenuchten::sample_loam_benchmark());
    let mut model = RichardsCyl::new(grid, soil, SolverConfig::new())?;
    model.set_uniform_head(-100.0)?.set_bc_inner(WaterBc::FluxOut {
        flux: -0.1,
        critical_head: -15000.0,
        length: 2.0 * dx,
    });
    let times = [10.0, 20.0];
    let heads = model.solve(&times, 0.01)?;

    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "r,h_10d,h_20d")?;
    for (i, r) in model.grid().centers().iter().enumerate() {
        writeln!(file, "{:e},{:e},{:e}", r, heads[[0, i]], heads[[1, i]])?;
    }
    file.flush()?;
    print_message("head profiles written to", &path.display().to_string());
    Ok(())
}

/// Runs the coupled scenario and writes the history
fn run_coupled(scenario: &Scenario, stem: &str) -> Result<(), Error> {
    let vg = VanGenuchten::from_array(&scenario.soil)?;
    let mut soil = BucketSoil::rectangular(
        scenario.domain_min,
        scenario.domain_max,
        scenario.cells,
        vg,
        scenario.initial_head,
    )?;
    soil.set_hydrostatic(scenario.initial_head, 0.0);
    let mut geometry = RootGeometry::straight_root(
        scenario.root_top,
        scenario.root_length,
        scenario.n_segments,
        scenario.root_radius,
    )?;
    geometry.set_cells(|p| soil.pick(p));
    let network = XylemNetwork::new(&geometry, scenario.coupling.kr, scenario.kx)?;
    let mut coupling = Coupling::new(soil, network, geometry, vg, scenario.coupling.clone())?;
    let history = coupling.run()?;
    history.write_csv(&format!("{}.csv", stem))?;
    history.write_json(&format!("{}.json", stem))?;
    println!(
        "{} steps; {} mass-balance warnings",
        history.records.len(),
        history.warnings.len()
    );
    print_message("history written to", &format!("{}.csv", stem));
    Ok(())
}

fn print_message(title: &str, path: &str) {
    let thin_line = format!("{:─^1$}", "", path.len());
    println!("\n\n{}", thin_line);
    println!("{}", title);
    println!("{}", path);
    println!("{}\n\n", thin_line);
}
