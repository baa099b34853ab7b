use super::{MacroSoil, RootGeometry, RootNetwork};
use crate::base::{CouplingConfig, Error, MassBalanceWarning, RootInterface, SplitRule};
use crate::material::VanGenuchten;
use crate::micro::{RadialGrid, RichardsCyl, WaterBc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Defines the state of the coupling loop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouplingStatus {
    NotStarted,
    Stepping,
    Converged,
    Failed,
}

/// Holds the diagnostics of one macro step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Time at the beginning of the step (days)
    pub time: f64,

    /// Realized uptake of all segments (cm³/day)
    pub actual_transpiration: f64,

    /// Transpiration demand (cm³/day)
    pub potential_transpiration: f64,

    /// Flow leaving the collar as computed by the root network (cm³/day)
    pub collar_flux: f64,

    /// Xylem pressure at the collar (cm)
    pub collar_pressure: f64,

    /// Macro head at the collar cell (cm)
    pub collar_cell_head: f64,

    /// Minimum head at the root surfaces (cm)
    pub min_interface_head: f64,

    /// Minimum xylem pressure (cm)
    pub min_xylem_pressure: f64,

    /// Water in the macro domain at the end of the step (cm³)
    pub domain_water: f64,

    /// Summed net-flux residual of the step (cm³)
    pub net_flux_residual: f64,

    /// Water taken by the roots since the first step (cm³)
    pub cumulative_uptake: f64,

    /// Water in the collar cell at the end of the step (cm³)
    pub collar_cell_water: f64,

    /// Water in the micro-models of the collar cell at the end of the step (cm³)
    pub cylinder_water: f64,
}

/// Holds the time series produced by the coupling loop
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplingHistory {
    pub records: Vec<StepRecord>,
    pub warnings: Vec<MassBalanceWarning>,
}

impl CouplingHistory {
    /// Writes a comma-delimited file with one line per step
    ///
    /// # Input
    ///
    /// * `full_path` -- may be a String, &str, or Path
    pub fn write_csv<P>(&self, full_path: &P) -> Result<(), Error>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        if let Some(p) = path.parent() {
            fs::create_dir_all(p)?;
        }
        let mut file = BufWriter::new(File::create(&path)?);
        writeln!(
            file,
            "time,actual_transpiration,potential_transpiration,collar_flux,collar_pressure,\
             collar_cell_head,min_interface_head,min_xylem_pressure,domain_water,net_flux_residual,\
             cumulative_uptake,collar_cell_water,cylinder_water"
        )?;
        for r in &self.records {
            writeln!(
                file,
                "{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e}",
                r.time,
                r.actual_transpiration,
                r.potential_transpiration,
                r.collar_flux,
                r.collar_pressure,
                r.collar_cell_head,
                r.min_interface_head,
                r.min_xylem_pressure,
                r.domain_water,
                r.net_flux_residual,
                r.cumulative_uptake,
                r.collar_cell_water,
                r.cylinder_water
            )?;
        }
        file.flush()?;
        Ok(())
    }

    /// Writes a JSON file with the records and warnings
    pub fn write_json<P>(&self, full_path: &P) -> Result<(), Error>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        if let Some(p) = path.parent() {
            fs::create_dir_all(p)?;
        }
        let mut file = File::create(&path)?;
        serde_json::to_writer_pretty(&mut file, &self)?;
        Ok(())
    }
}

/// Couples the cylindrical micro-models to a macro soil model and a root network
///
/// Each macro step:
///
/// 1. reads the macro head at the cell of each segment and the root-surface heads of the micro-models
/// 2. solves the root network with the transpiration demand
/// 3. splits the last net-flux residual of each macro cell among its segments
/// 4. sets the inner boundary conditions (see [RootInterface]) and the outer flux conditions
/// 5. solves all micro-models in parallel
/// 6. aggregates the realized root-surface fluxes per macro cell and advances the macro model
/// 7. computes the new net-flux residuals
pub struct Coupling<S: MacroSoil, R: RootNetwork> {
    soil: S,
    network: R,
    geometry: RootGeometry,
    params: Arc<VanGenuchten>,
    config: CouplingConfig,

    /// Micro-models (None for degenerate segments)
    cylinders: Vec<Option<RichardsCyl>>,

    outer_radii: Vec<f64>,
    pool: ThreadPool,
    status: CouplingStatus,
    collar_cell: usize,
    sentinel_cell: usize,
    step: usize,
    t: f64,

    /// Net-flux residual of the last step per macro cell (cm³)
    net_flux: Vec<f64>,

    /// Realized flux of the last step per segment (cm³/day; sink negative)
    realized: Vec<f64>,

    /// Macro head at the cell of each segment at the beginning of the last step (cm)
    macro_heads: Vec<f64>,

    /// Root-surface heads given to the root network in the last step (cm)
    interface_heads: Vec<f64>,

    /// Soil conductances given to the root network in the last step (1/day)
    soil_k: Vec<f64>,

    /// Water taken by the roots since the first step (cm³)
    cumulative_uptake: f64,

    /// Sources applied to the macro cells in the last step (cm³/day)
    ledger: BTreeMap<usize, f64>,

    history: CouplingHistory,
}

impl<S: MacroSoil, R: RootNetwork> Coupling<S, R> {
    /// Allocates a new instance
    ///
    /// The segments of `geometry` must already be mapped onto the cells of `soil`.
    pub fn new(
        soil: S,
        network: R,
        geometry: RootGeometry,
        soil_params: VanGenuchten,
        config: CouplingConfig,
    ) -> Result<Self, Error> {
        if let Some(msg) = config.validate() {
            return Err(Error::InvalidParameter(msg));
        }
        let collar_cell = geometry
            .collar_cell()
            .ok_or_else(|| Error::InvalidGeometry("the collar must be inside the soil domain".to_string()))?;
        let n_cells = soil.n_cells();
        let sentinel_cell = config.sentinel_cell.unwrap_or(collar_cell);
        if sentinel_cell >= n_cells {
            return Err(Error::InvalidParameter(format!(
                "sentinel cell {} is out of range",
                sentinel_cell
            )));
        }
        let outer_radii = geometry.outer_radii(&soil.cell_volumes())?;

        // micro-models
        let params = Arc::new(soil_params);
        let ns = geometry.n_segments();
        let mut cylinders = Vec::with_capacity(ns);
        for j in 0..ns {
            let r_in = geometry.radii()[j];
            let r_out = outer_radii[j];
            match geometry.cells()[j] {
                Some(cell) if r_in < r_out => {
                    let grid = RadialGrid::new(r_in, r_out, config.nc, config.log_base)?;
                    let mut cyl = RichardsCyl::new(grid, params.clone(), config.solver)?;
                    cyl.set_uniform_head(soil.head(cell)?)?;
                    cylinders.push(Some(cyl));
                }
                _ => {
                    println!(
                        "WARNING: segment {} is degenerate (r_in = {:?}, r_out = {:?}); skipped",
                        j, r_in, r_out
                    );
                    cylinders.push(None);
                }
            }
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.n_threads)
            .build()
            .map_err(|e| Error::InvalidParameter(format!("cannot build the thread pool: {}", e)))?;

        Ok(Coupling {
            soil,
            network,
            geometry,
            params,
            cylinders,
            outer_radii,
            pool,
            status: CouplingStatus::NotStarted,
            collar_cell,
            sentinel_cell,
            step: 0,
            t: 0.0,
            net_flux: vec![0.0; n_cells],
            realized: vec![0.0; ns],
            macro_heads: vec![0.0; ns],
            interface_heads: vec![0.0; ns],
            soil_k: vec![0.0; ns],
            cumulative_uptake: 0.0,
            ledger: BTreeMap::new(),
            history: CouplingHistory::default(),
            config,
        })
    }

    /// Performs one macro step
    ///
    /// Any failure (e.g., a micro-model that does not converge) aborts the step and moves the
    /// loop to the Failed state.
    pub fn step(&mut self) -> Result<(), Error> {
        match self.status {
            CouplingStatus::Failed => {
                return Err(Error::InvalidParameter("the coupling loop has failed".to_string()))
            }
            CouplingStatus::Converged => {
                return Err(Error::InvalidParameter("the coupling loop has finished".to_string()))
            }
            _ => (),
        }
        self.status = CouplingStatus::Stepping;
        if let Err(e) = self.advance() {
            self.status = CouplingStatus::Failed;
            return Err(e);
        }
        Ok(())
    }

    /// Runs all steps, or until the sentinel head falls below the wilting point
    pub fn run(&mut self) -> Result<CouplingHistory, Error> {
        if self.config.verbose {
            println!("{}", self.config);
            self.print_header();
        }
        while self.step < self.config.n_steps {
            if self.soil.head(self.sentinel_cell)? < self.config.wilting_point {
                if self.config.verbose {
                    println!("sentinel cell {} reached the wilting point", self.sentinel_cell);
                }
                break;
            }
            self.step()?;
        }
        self.status = CouplingStatus::Converged;
        if self.config.verbose {
            println!("{}", "─".repeat(79));
        }
        Ok(self.history.clone())
    }

    fn advance(&mut self) -> Result<(), Error> {
        let dt = self.config.dt;
        let t = self.t;
        let ns = self.geometry.n_segments();
        let wilting_point = self.config.wilting_point;

        // macro heads and root-surface heads
        let collar_cell_head = self.soil.head(self.collar_cell)?;
        for j in 0..ns {
            self.macro_heads[j] = match self.geometry.cells()[j] {
                Some(cell) => self.soil.head(cell)?,
                None => collar_cell_head,
            };
            match &self.cylinders[j] {
                Some(cyl) => {
                    self.interface_heads[j] = cyl.inner_head();
                    self.soil_k[j] = match self.config.interface {
                        RootInterface::NetworkFlux => {
                            self.params.hydraulic_conductivity(cyl.inner_head()) / self.geometry.radii()[j]
                        }
                        RootInterface::RootSystem => f64::INFINITY,
                    };
                }
                None => {
                    self.interface_heads[j] = self.macro_heads[j];
                    self.soil_k[j] = 0.0;
                }
            }
        }

        // root network
        let demand = self.config.transpiration.at(t);
        let rx = self
            .network
            .solve(t, demand, &self.interface_heads, wilting_point, &self.soil_k)?;
        if rx.len() != self.geometry.n_nodes() {
            return Err(Error::Collaborator(format!(
                "the root network returned {} pressures for {} nodes",
                rx.len(),
                self.geometry.n_nodes()
            )));
        }
        let collar_flux = self.network.collar_flux(&rx, &self.interface_heads, &self.soil_k);
        let segment_fluxes = self.network.segment_fluxes(&rx, &self.interface_heads, &self.soil_k);
        if segment_fluxes.len() != ns {
            return Err(Error::Collaborator(format!(
                "the root network returned {} segment fluxes for {} segments",
                segment_fluxes.len(),
                ns
            )));
        }

        // boundary conditions
        let outer_fluxes = self.split_net_flux(dt);
        for j in 0..ns {
            let [a, b] = self.geometry.segments()[j];
            let r_in = self.geometry.radii()[j];
            let l = self.geometry.lengths()[j];
            let r_out = self.outer_radii[j];
            if let Some(cyl) = self.cylinders[j].as_mut() {
                let inner = match self.config.interface {
                    RootInterface::NetworkFlux => WaterBc::FluxOut {
                        flux: segment_fluxes[j] / (2.0 * PI * r_in * l),
                        critical_head: wilting_point,
                        length: cyl.grid().inner_spacing(),
                    },
                    RootInterface::RootSystem => WaterBc::RootSystem {
                        xylem_head: 0.5 * (rx[a] + rx[b]),
                        kr: self.config.kr,
                    },
                };
                let dx_outer = cyl.grid().outer_spacing();
                cyl.set_bc_inner(inner);
                cyl.set_bc_outer(WaterBc::FluxIn {
                    flux: outer_fluxes[j] / (2.0 * PI * r_out * l),
                    reference_head: 0.0,
                    length: dx_outer,
                });
            }
        }

        // micro-models (all solves finish before the aggregation)
        let max_substep = dt / (self.config.micro_substeps as f64);
        let cylinders = &mut self.cylinders;
        let results: Vec<Result<(), Error>> = self.pool.install(|| {
            cylinders
                .par_iter_mut()
                .enumerate()
                .map(|(j, cyl)| match cyl {
                    Some(c) => c.solve(&[dt], max_substep).map(|_| ()).map_err(|e| e.with_segment(j)),
                    None => Ok(()),
                })
                .collect()
        });
        for res in results {
            res?;
        }

        // aggregation
        self.ledger.clear();
        for j in 0..ns {
            let r_in = self.geometry.radii()[j];
            let l = self.geometry.lengths()[j];
            self.realized[j] = match &self.cylinders[j] {
                Some(cyl) => cyl.inner_flux() * 2.0 * PI * r_in * l,
                None => 0.0,
            };
            if let Some(cell) = self.geometry.cells()[j] {
                *self.ledger.entry(cell).or_insert(0.0) += self.realized[j];
            }
        }

        // macro model
        let volumes = self.soil.cell_volumes();
        let old_water = cell_water(&self.soil.water_contents(), &volumes);
        self.soil.set_sources(&self.ledger)?;
        self.soil.advance(dt)?;
        let new_water = cell_water(&self.soil.water_contents(), &volumes);

        // net-flux residual
        let tol = self.config.mass_balance_tol;
        for c in 0..self.net_flux.len() {
            let applied = self.ledger.get(&c).copied().unwrap_or(0.0);
            self.net_flux[c] = new_water[c] - old_water[c] - applied * dt;
            if f64::abs(self.net_flux[c]) > tol {
                let warning = MassBalanceWarning {
                    step: self.step,
                    t: t + dt,
                    cell: Some(c),
                    residual: self.net_flux[c],
                    tolerance: tol,
                };
                if self.config.verbose {
                    println!("{}", warning);
                }
                self.history.warnings.push(warning);
            }
        }

        // diagnostics
        let uptake = -self.realized.iter().sum::<f64>();
        self.cumulative_uptake += uptake * dt;
        let mut cylinder_water = 0.0;
        if let Some(segs) = self.geometry.cell_to_segments().get(&self.collar_cell) {
            for j in segs {
                if let Some(cyl) = &self.cylinders[*j] {
                    cylinder_water += cyl.water_volume() * self.geometry.lengths()[*j];
                }
            }
        }
        let record = StepRecord {
            time: t,
            actual_transpiration: uptake,
            potential_transpiration: demand,
            collar_flux,
            collar_pressure: rx[0],
            collar_cell_head,
            min_interface_head: self.interface_heads.iter().copied().fold(f64::INFINITY, f64::min),
            min_xylem_pressure: rx.iter().copied().fold(f64::INFINITY, f64::min),
            domain_water: new_water.iter().sum(),
            net_flux_residual: self.net_flux.iter().sum(),
            cumulative_uptake: self.cumulative_uptake,
            collar_cell_water: new_water[self.collar_cell],
            cylinder_water,
        };
        self.print_step(&record);
        self.history.records.push(record);
        self.t += dt;
        self.step += 1;
        Ok(())
    }

    /// Splits the net-flux residual of each cell among its segments (cm³/day)
    fn split_net_flux(&self, dt: f64) -> Vec<f64> {
        let ns = self.geometry.n_segments();
        let mut res = vec![0.0; ns];
        for (cell, segs) in self.geometry.cell_to_segments() {
            let weights: Vec<(usize, f64)> = segs
                .iter()
                .filter(|j| self.cylinders[**j].is_some())
                .map(|j| (*j, self.split_weight(*j)))
                .collect();
            let total: f64 = weights.iter().map(|(_, w)| w).sum();
            if !(total > 0.0) {
                continue;
            }
            let rate = self.net_flux[*cell] / dt;
            for (j, w) in weights {
                res[j] = rate * w / total;
            }
        }
        res
    }

    fn split_weight(&self, j: usize) -> f64 {
        let r_in = self.geometry.radii()[j];
        let r_out = self.outer_radii[j];
        let l = self.geometry.lengths()[j];
        match self.config.split {
            SplitRule::Volume => PI * (r_out * r_out - r_in * r_in) * l,
            SplitRule::Surface => 2.0 * PI * r_out * l,
            SplitRule::Length => l,
        }
    }

    fn print_header(&self) {
        println!("{}", "─".repeat(79));
        println!(
            "{:>6} {:>10} {:>11} {:>11} {:>11} {:>11} {:>11}",
            "step", "t", "T_pot", "T_act", "p_collar", "min(h_rs)", "residual"
        );
        println!("{}", "─".repeat(79));
    }

    fn print_step(&self, r: &StepRecord) {
        if self.config.verbose {
            println!(
                "{:>6} {:>10.4} {:>11.4e} {:>11.4e} {:>11.4e} {:>11.4e} {:>11.2e}",
                self.step + 1,
                r.time,
                r.potential_transpiration,
                r.actual_transpiration,
                r.collar_pressure,
                r.min_interface_head,
                r.net_flux_residual
            );
        }
    }

    pub fn status(&self) -> CouplingStatus {
        self.status
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    /// Returns the number of completed steps
    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn soil(&self) -> &S {
        &self.soil
    }

    pub fn network(&self) -> &R {
        &self.network
    }

    pub fn geometry(&self) -> &RootGeometry {
        &self.geometry
    }

    /// Returns the micro-model of segment j (None if the segment is degenerate)
    pub fn cylinder(&self, j: usize) -> Option<&RichardsCyl> {
        self.cylinders.get(j).and_then(|c| c.as_ref())
    }

    pub fn outer_radii(&self) -> &[f64] {
        &self.outer_radii
    }

    /// Returns the net-flux residual of the last step per macro cell (cm³)
    pub fn net_flux(&self) -> &[f64] {
        &self.net_flux
    }

    /// Returns the realized flux of the last step per segment (cm³/day)
    pub fn realized_fluxes(&self) -> &[f64] {
        &self.realized
    }

    /// Returns the macro head at the cell of each segment at the beginning of the last step
    ///
    /// Segments outside the soil domain get the head of the collar cell.
    pub fn macro_heads(&self) -> &[f64] {
        &self.macro_heads
    }

    /// Returns the root-surface heads given to the root network in the last step
    ///
    /// Degenerate segments get their macro head.
    pub fn interface_heads(&self) -> &[f64] {
        &self.interface_heads
    }

    /// Returns the soil conductances given to the root network in the last step (1/day)
    ///
    /// Degenerate segments get zero, hence they exchange no water.
    pub fn soil_conductivities(&self) -> &[f64] {
        &self.soil_k
    }

    /// Returns the sources applied to the macro cells in the last step (cm³/day)
    pub fn ledger(&self) -> &BTreeMap<usize, f64> {
        &self.ledger
    }

    pub fn history(&self) -> &CouplingHistory {
        &self.history
    }
}

fn cell_water(theta: &[f64], volumes: &[f64]) -> Vec<f64> {
    theta.iter().zip(volumes).map(|(th, v)| th * v).collect()
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{Coupling, CouplingStatus};
    use crate::base::{CouplingConfig, Error, RootInterface, SplitRule, Transpiration};
    use crate::coupling::{BucketSoil, MacroSoil, RootGeometry, RootNetwork, XylemNetwork};
    use crate::material::VanGenuchten;
    use crate::micro::WaterBc;
    use russell_chk::approx_eq;
    use std::collections::BTreeMap;
    use std::f64::consts::PI;

    // 1 × 1 × 2 cells of 2 cm; segments 0 and 1 in cell 1 (collar cell), segment 2 in cell 0
    fn sample_coupling_at(
        config: CouplingConfig,
        initial_head: f64,
    ) -> Result<Coupling<BucketSoil, XylemNetwork>, Error> {
        let vg = VanGenuchten::sample_loam();
        let soil = BucketSoil::rectangular([-1.0, -1.0, -4.0], [1.0, 1.0, 0.0], [1, 1, 2], vg, initial_head)?;
        let mut geo = RootGeometry::straight_root([0.0, 0.0, -0.5], 3.0, 3, 0.05)?;
        geo.set_cells(|p| soil.pick(p));
        let net = XylemNetwork::new(&geo, config.kr, 4.32e-2)?;
        Coupling::new(soil, net, geo, vg, config)
    }

    fn sample_coupling(config: CouplingConfig) -> Result<Coupling<BucketSoil, XylemNetwork>, Error> {
        sample_coupling_at(config, -300.0)
    }

    /// Bucket that loses water through cell 0 without telling the coupling
    struct LeakyBucket {
        inner: BucketSoil,
        leak: f64,
    }

    impl MacroSoil for LeakyBucket {
        fn n_cells(&self) -> usize {
            self.inner.n_cells()
        }
        fn head(&self, cell: usize) -> Result<f64, Error> {
            self.inner.head(cell)
        }
        fn water_contents(&self) -> Vec<f64> {
            self.inner.water_contents()
        }
        fn cell_volumes(&self) -> Vec<f64> {
            self.inner.cell_volumes()
        }
        fn set_sources(&mut self, sources: &BTreeMap<usize, f64>) -> Result<(), Error> {
            let mut leaky = sources.clone();
            *leaky.entry(0).or_insert(0.0) += self.leak;
            self.inner.set_sources(&leaky)
        }
        fn advance(&mut self, dt: f64) -> Result<(), Error> {
            self.inner.advance(dt)
        }
        fn time(&self) -> f64 {
            self.inner.time()
        }
    }

    /// Network returning `n_pressures` pressures and no segment fluxes when `no_fluxes` is set
    struct BrokenNetwork {
        n_pressures: usize,
        no_fluxes: bool,
    }

    impl RootNetwork for BrokenNetwork {
        fn solve(&mut self, _: f64, _: f64, _: &[f64], _: f64, _: &[f64]) -> Result<Vec<f64>, Error> {
            Ok(vec![-500.0; self.n_pressures])
        }
        fn segment_fluxes(&self, _: &[f64], interface_heads: &[f64], _: &[f64]) -> Vec<f64> {
            if self.no_fluxes {
                Vec::new()
            } else {
                vec![0.0; interface_heads.len()]
            }
        }
        fn collar_flux(&self, _: &[f64], _: &[f64], _: &[f64]) -> f64 {
            0.0
        }
    }

    #[test]
    fn new_captures_errors() -> Result<(), Error> {
        let mut config = CouplingConfig::new();
        config.nc = 1;
        assert!(sample_coupling(config).is_err());
        let mut config = CouplingConfig::new();
        config.sentinel_cell = Some(2);
        assert!(sample_coupling(config).is_err());

        // collar outside the domain
        let vg = VanGenuchten::sample_loam();
        let soil = BucketSoil::rectangular([-1.0, -1.0, -4.0], [1.0, 1.0, 0.0], [1, 1, 2], vg, -300.0)?;
        let mut geo = RootGeometry::straight_root([0.0, 0.0, 1.0], 3.0, 3, 0.05)?;
        geo.set_cells(|p| soil.pick(p));
        let net = XylemNetwork::new(&geo, 1e-4, 1e-2)?;
        assert!(Coupling::new(soil, net, geo, vg, CouplingConfig::new()).is_err());
        Ok(())
    }

    #[test]
    fn step_aggregates_the_realized_fluxes() -> Result<(), Error> {
        let mut config = CouplingConfig::new();
        config
            .set_time_stepping(4, 0.01)?
            .set_transpiration(Transpiration::Constant(1.0))?
            .set_split(SplitRule::Surface)?
            .set_n_threads(2)?;
        let mut coupling = sample_coupling(config)?;
        assert_eq!(coupling.status(), CouplingStatus::NotStarted);
        assert!(coupling.cylinder(0).is_some());
        coupling.step()?;
        assert_eq!(coupling.status(), CouplingStatus::Stepping);

        // ledger equals the sum of the realized fluxes
        let realized = coupling.realized_fluxes().to_vec();
        let ledger_total: f64 = coupling.ledger().values().sum();
        approx_eq(ledger_total, realized.iter().sum(), 1e-15);
        assert!(realized.iter().all(|q| *q < 0.0));
        approx_eq(coupling.ledger()[&0], realized[2], 1e-15);
        approx_eq(coupling.ledger()[&1], realized[0] + realized[1], 1e-15);

        // buckets do not clamp here, thus the residual vanishes
        assert!(coupling.net_flux().iter().all(|r| f64::abs(*r) < 1e-12));
        assert_eq!(coupling.history().warnings.len(), 0);

        let history = coupling.run()?;
        assert_eq!(coupling.status(), CouplingStatus::Converged);
        assert_eq!(history.records.len(), 4);
        approx_eq(coupling.time(), 0.04, 1e-15);
        assert!(coupling.step().is_err());
        for r in &history.records {
            assert!(r.actual_transpiration > 0.0);
            assert_eq!(r.potential_transpiration, 1.0);
            assert!(r.min_xylem_pressure <= r.collar_pressure);
        }
        Ok(())
    }

    #[test]
    fn ledger_matches_the_collar_flux_in_wet_soil() -> Result<(), Error> {
        let mut config = CouplingConfig::new();
        config
            .set_time_stepping(3, 0.01)?
            .set_transpiration(Transpiration::Constant(1.0))?;
        let mut coupling = sample_coupling(config)?;
        let mut uptake = 0.0;
        for k in 0..3 {
            coupling.step()?;
            let ledger_total: f64 = coupling.ledger().values().sum();
            let r = &coupling.history().records[k];
            approx_eq(ledger_total + r.collar_flux, 0.0, 1e-12);
            approx_eq(r.collar_flux, 1.0, 1e-10);
            assert!(r.collar_pressure > -15000.0);

            // balance of the collar cell (cell 1 holds segments 0 and 1)
            uptake += r.actual_transpiration * 0.01;
            approx_eq(r.cumulative_uptake, uptake, 1e-15);
            approx_eq(r.collar_cell_water, coupling.soil().water_contents()[1] * 8.0, 1e-14);
            let mut cylinder_water = 0.0;
            for j in 0..2 {
                if let Some(cyl) = coupling.cylinder(j) {
                    cylinder_water += cyl.water_volume() * coupling.geometry().lengths()[j];
                }
            }
            approx_eq(r.cylinder_water, cylinder_water, 1e-14);
        }
        Ok(())
    }

    #[test]
    fn ledger_matches_the_collar_flux_in_dry_soil() -> Result<(), Error> {
        let mut config = CouplingConfig::new();
        config
            .set_time_stepping(2, 5e-4)?
            .set_transpiration(Transpiration::Constant(5.0))?
            .set_wilting_point(-3000.0)?;
        let mut coupling = sample_coupling_at(config, -1000.0)?;
        for k in 0..2 {
            coupling.step()?;
            let ledger_total: f64 = coupling.ledger().values().sum();
            let r = &coupling.history().records[k];
            assert!(coupling.network().at_wilting_point());
            assert_eq!(r.collar_pressure, -3000.0);
            assert!(r.collar_flux > 0.0 && r.collar_flux < 5.0);
            approx_eq(ledger_total + r.collar_flux, 0.0, 1e-12);
        }
        Ok(())
    }

    #[test]
    fn root_system_interface_uses_bare_kr() -> Result<(), Error> {
        let mut config = CouplingConfig::new();
        config
            .set_time_stepping(1, 0.01)?
            .set_transpiration(Transpiration::Constant(1.0))?
            .set_interface(RootInterface::RootSystem)?;
        let mut coupling = sample_coupling(config)?;
        coupling.step()?;
        assert!(coupling.soil_conductivities().iter().all(|k| *k == f64::INFINITY));
        match coupling.cylinder(0).map(|c| *c.bc_inner()) {
            Some(WaterBc::RootSystem { kr, .. }) => assert_eq!(kr, 1.728e-4),
            other => panic!("expected a root-system condition, got {:?}", other),
        }

        // the micro-models lag the network by one step
        let ledger_total: f64 = coupling.ledger().values().sum();
        let r = &coupling.history().records[0];
        assert!(f64::abs(ledger_total + r.collar_flux) < 0.05 * r.collar_flux);
        Ok(())
    }

    #[test]
    fn degenerate_segments_exchange_no_water() -> Result<(), Error> {
        // the midpoint of segment 2 (z = -4.25) lies below the box
        let vg = VanGenuchten::sample_loam();
        let mut soil = BucketSoil::rectangular([-1.0, -1.0, -4.0], [1.0, 1.0, 0.0], [1, 1, 2], vg, -300.0)?;
        soil.set_hydrostatic(-300.0, 0.0);
        let mut geo = RootGeometry::straight_root([0.0, 0.0, -0.5], 4.5, 3, 0.05)?;
        geo.set_cells(|p| soil.pick(p));
        assert_eq!(geo.cells(), &[Some(1), Some(0), None]);
        let net = XylemNetwork::new(&geo, 1.728e-4, 4.32e-2)?;
        let mut config = CouplingConfig::new();
        config
            .set_time_stepping(2, 0.01)?
            .set_transpiration(Transpiration::Constant(0.5))?;
        let mut coupling = Coupling::new(soil, net, geo, vg, config)?;
        assert!(coupling.cylinder(2).is_none());
        assert_eq!(coupling.outer_radii()[2], 0.0);

        let h0 = coupling.soil().head(0)?;
        let h1 = coupling.soil().head(1)?;
        coupling.step()?;
        assert_eq!(coupling.macro_heads(), &[h1, h0, h1]);
        assert_eq!(coupling.interface_heads()[2], h1);
        assert_eq!(coupling.soil_conductivities()[2], 0.0);
        assert!(coupling.soil_conductivities()[0] > 0.0);
        assert_eq!(coupling.realized_fluxes()[2], 0.0);
        assert!(coupling.realized_fluxes()[0] < 0.0);
        assert_eq!(coupling.ledger().len(), 2);

        // the segment outside takes nothing from the network either
        let ledger_total: f64 = coupling.ledger().values().sum();
        approx_eq(ledger_total + coupling.history().records[0].collar_flux, 0.0, 1e-12);
        coupling.step()?;
        assert_eq!(coupling.realized_fluxes()[2], 0.0);
        Ok(())
    }

    #[test]
    fn residual_warns_and_feeds_the_outer_boundary() -> Result<(), Error> {
        let vg = VanGenuchten::sample_loam();
        let inner = BucketSoil::rectangular([-1.0, -1.0, -4.0], [1.0, 1.0, 0.0], [1, 1, 2], vg, -300.0)?;
        let mut geo = RootGeometry::straight_root([0.0, 0.0, -0.5], 3.0, 3, 0.05)?;
        geo.set_cells(|p| inner.pick(p));
        let net = XylemNetwork::new(&geo, 1.728e-4, 4.32e-2)?;
        let soil = LeakyBucket { inner, leak: -0.5 };
        let mut config = CouplingConfig::new();
        config
            .set_time_stepping(2, 0.01)?
            .set_transpiration(Transpiration::Constant(0.5))?;
        let mut coupling = Coupling::new(soil, net, geo, vg, config)?;

        // the leak of cell 0 is not in the ledger
        coupling.step()?;
        let residual = coupling.net_flux()[0];
        approx_eq(residual, -0.5 * 0.01, 1e-12);
        assert!(f64::abs(coupling.net_flux()[1]) < 1e-12);
        let warnings = &coupling.history().warnings;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, 0);
        assert_eq!(warnings[0].cell, Some(0));
        approx_eq(warnings[0].residual, residual, 1e-15);
        approx_eq(coupling.history().records[0].net_flux_residual, residual, 1e-12);

        // the residual of cell 0 goes to segment 2 (the only one there) in the next step
        coupling.step()?;
        let r_out = coupling.outer_radii()[2];
        let l = coupling.geometry().lengths()[2];
        let cyl = coupling
            .cylinder(2)
            .ok_or(Error::InvalidParameter("missing cylinder".to_string()))?;
        match *cyl.bc_outer() {
            WaterBc::FluxIn {
                flux,
                reference_head,
                length,
            } => {
                approx_eq(flux, (residual / 0.01) / (2.0 * PI * r_out * l), 1e-14);
                assert_eq!(reference_head, 0.0);
                assert_eq!(length, cyl.grid().outer_spacing());
            }
            other => panic!("expected an inflow condition, got {:?}", other),
        }
        let cyl0 = coupling
            .cylinder(0)
            .ok_or(Error::InvalidParameter("missing cylinder".to_string()))?;
        match *cyl0.bc_outer() {
            WaterBc::FluxIn { flux, .. } => assert!(f64::abs(flux) < 1e-10),
            other => panic!("expected an inflow condition, got {:?}", other),
        }
        assert_eq!(coupling.history().warnings.len(), 2);
        Ok(())
    }

    #[test]
    fn step_rejects_inconsistent_networks() -> Result<(), Error> {
        let vg = VanGenuchten::sample_loam();
        for (n_pressures, no_fluxes) in [(1, false), (4, true)] {
            let soil = BucketSoil::rectangular([-1.0, -1.0, -4.0], [1.0, 1.0, 0.0], [1, 1, 2], vg, -300.0)?;
            let mut geo = RootGeometry::straight_root([0.0, 0.0, -0.5], 3.0, 3, 0.05)?;
            geo.set_cells(|p| soil.pick(p));
            let net = BrokenNetwork { n_pressures, no_fluxes };
            let mut coupling = Coupling::new(soil, net, geo, vg, CouplingConfig::new())?;
            match coupling.step() {
                Err(Error::Collaborator(_)) => (),
                other => panic!("expected a collaborator error, got {:?}", other),
            }
            assert_eq!(coupling.status(), CouplingStatus::Failed);
        }
        Ok(())
    }

    #[test]
    fn run_stops_at_the_wilting_point() -> Result<(), Error> {
        let mut config = CouplingConfig::new();
        config.set_time_stepping(10, 0.01)?.set_wilting_point(-200.0)?;
        let mut coupling = sample_coupling(config)?;
        assert!(coupling.soil().head(0)? < -200.0);
        let history = coupling.run()?;
        assert_eq!(history.records.len(), 0);
        assert_eq!(coupling.status(), CouplingStatus::Converged);
        Ok(())
    }
}
