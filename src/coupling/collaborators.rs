use super::RootGeometry;
use crate::base::{Error, TreeMatrix};
use crate::material::VanGenuchten;
use ndarray::Array1;
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Defines the macroscopic (3D) soil model driven by the coupling loop
///
/// Lengths are in cm, heads in cm, time in days and sources in cm³/day (sinks negative).
pub trait MacroSoil {
    /// Returns the number of cells
    fn n_cells(&self) -> usize;

    /// Returns the pressure head of a cell
    fn head(&self, cell: usize) -> Result<f64, Error>;

    /// Returns the water content of all cells
    fn water_contents(&self) -> Vec<f64>;

    /// Returns the volume of all cells (cm³)
    fn cell_volumes(&self) -> Vec<f64>;

    /// Replaces the sources (cm³/day) applied during the next advance
    fn set_sources(&mut self, sources: &BTreeMap<usize, f64>) -> Result<(), Error>;

    /// Advances the model by dt
    fn advance(&mut self, dt: f64) -> Result<(), Error>;

    /// Returns the current time
    fn time(&self) -> f64;
}

/// Defines the hydraulic model of the root xylem
pub trait RootNetwork {
    /// Solves the xylem pressures at the nodes
    ///
    /// # Input
    ///
    /// * `t` -- current time
    /// * `demand` -- potential transpiration at the collar (cm³/day, ≥ 0)
    /// * `interface_heads` -- soil head at the root surface of each segment
    /// * `wilting_point` -- lowest allowed collar pressure
    /// * `soil_k` -- soil conductance at the root surface of each segment (1/day)
    fn solve(
        &mut self,
        t: f64,
        demand: f64,
        interface_heads: &[f64],
        wilting_point: f64,
        soil_k: &[f64],
    ) -> Result<Vec<f64>, Error>;

    /// Returns the flow from the soil into each segment with the soil-side sign (cm³/day)
    ///
    /// Negative values mean uptake (water leaves the soil).
    fn segment_fluxes(&self, rx: &[f64], interface_heads: &[f64], soil_k: &[f64]) -> Vec<f64>;

    /// Returns the flow leaving the root system at the collar (cm³/day, positive for transpiration)
    fn collar_flux(&self, rx: &[f64], interface_heads: &[f64], soil_k: &[f64]) -> f64;
}

/// Implements a simple macro soil model made of well-mixed rectangular cells
///
/// There is no flow between cells: sources are integrated explicitly and the water content
/// is clamped to [θr, θs]. Clamped water shows up as a net-flux residual in the coupling.
#[derive(Clone, Debug)]
pub struct BucketSoil {
    min: [f64; 3],
    max: [f64; 3],
    ncell: [usize; 3],
    soil: VanGenuchten,
    theta: Vec<f64>,
    volumes: Vec<f64>,
    sources: BTreeMap<usize, f64>,
    t: f64,
}

impl BucketSoil {
    /// Allocates a rectangular grid of cells with uniform initial head
    pub fn rectangular(
        min: [f64; 3],
        max: [f64; 3],
        ncell: [usize; 3],
        soil: VanGenuchten,
        initial_head: f64,
    ) -> Result<Self, Error> {
        for d in 0..3 {
            if ncell[d] < 1 || !(min[d] < max[d]) {
                return Err(Error::InvalidGeometry(format!(
                    "invalid box along direction {}: min = {:?}, max = {:?}, ncell = {}",
                    d, min[d], max[d], ncell[d]
                )));
            }
        }
        let n = ncell[0] * ncell[1] * ncell[2];
        let dv: f64 = (0..3).map(|d| (max[d] - min[d]) / (ncell[d] as f64)).product();
        Ok(BucketSoil {
            min,
            max,
            ncell,
            theta: vec![soil.water_content(initial_head); n],
            volumes: vec![dv; n],
            soil,
            sources: BTreeMap::new(),
            t: 0.0,
        })
    }

    /// Sets hydrostatic heads h(z) = reference_head − (z − reference_z) at the cell centers
    pub fn set_hydrostatic(&mut self, reference_head: f64, reference_z: f64) -> &mut Self {
        for cell in 0..self.theta.len() {
            let z = self.center(cell)[2];
            self.theta[cell] = self.soil.water_content(reference_head - (z - reference_z));
        }
        self
    }

    /// Returns the cell containing a point (points on the upper faces belong to the last cells)
    pub fn pick(&self, point: &[f64; 3]) -> Option<usize> {
        let mut idx = [0; 3];
        for d in 0..3 {
            if point[d] < self.min[d] || point[d] > self.max[d] {
                return None;
            }
            let h = (self.max[d] - self.min[d]) / (self.ncell[d] as f64);
            let i = ((point[d] - self.min[d]) / h) as usize;
            idx[d] = usize::min(i, self.ncell[d] - 1);
        }
        Some(idx[0] + idx[1] * self.ncell[0] + idx[2] * self.ncell[0] * self.ncell[1])
    }

    /// Returns the center of a cell
    pub fn center(&self, cell: usize) -> [f64; 3] {
        let nx = self.ncell[0];
        let ny = self.ncell[1];
        let idx = [cell % nx, (cell / nx) % ny, cell / (nx * ny)];
        let mut x = [0.0; 3];
        for d in 0..3 {
            let h = (self.max[d] - self.min[d]) / (self.ncell[d] as f64);
            x[d] = self.min[d] + h * (idx[d] as f64 + 0.5);
        }
        x
    }

    /// Returns the total water volume (cm³)
    pub fn water_volume(&self) -> f64 {
        self.theta.iter().zip(&self.volumes).map(|(th, v)| th * v).sum()
    }
}

impl MacroSoil for BucketSoil {
    fn n_cells(&self) -> usize {
        self.theta.len()
    }

    fn head(&self, cell: usize) -> Result<f64, Error> {
        match self.theta.get(cell) {
            Some(theta) => Ok(self.soil.pressure_head(*theta)),
            None => Err(Error::Collaborator(format!("cell index {} is out of range", cell))),
        }
    }

    fn water_contents(&self) -> Vec<f64> {
        self.theta.clone()
    }

    fn cell_volumes(&self) -> Vec<f64> {
        self.volumes.clone()
    }

    fn set_sources(&mut self, sources: &BTreeMap<usize, f64>) -> Result<(), Error> {
        if let Some((cell, _)) = sources.iter().find(|(cell, _)| **cell >= self.theta.len()) {
            return Err(Error::Collaborator(format!("source cell {} is out of range", cell)));
        }
        self.sources = sources.clone();
        Ok(())
    }

    fn advance(&mut self, dt: f64) -> Result<(), Error> {
        if !(dt > 0.0) {
            return Err(Error::Collaborator("dt must be > 0.0".to_string()));
        }
        for (cell, rate) in &self.sources {
            let theta = self.theta[*cell] + rate * dt / self.volumes[*cell];
            self.theta[*cell] = f64::max(self.soil.theta_r, f64::min(theta, self.soil.theta_s));
        }
        self.t += dt;
        Ok(())
    }

    fn time(&self) -> f64 {
        self.t
    }
}

/// Implements a hybrid 1D hydraulic model of the root xylem
///
/// The unknowns are the xylem pressure heads at the nodes. Each segment carries an axial
/// flow `kx/l (p_a + z_a − p_b − z_b)` and a radial inflow `k_s (h_s − (p_a + p_b)/2)` split
/// equally between its nodes, where the radial conductance combines the root and the soil
/// conductivities in series:
///
/// ```text
/// k_s = 2π ρ l kr k_soil / (kr + k_soil)
/// ```
///
/// The collar (node 0) releases the transpiration demand, unless its pressure would fall
/// below the wilting point; the pressure is then fixed at the wilting point. An infinite soil
/// conductivity leaves `kr` alone, which is the law of [crate::micro::WaterBc::RootSystem].
///
/// The segments must form a tree rooted at the collar; the system is solved by eliminating
/// the root tips first.
#[derive(Clone, Debug)]
pub struct XylemNetwork {
    z: Vec<f64>,
    segments: Vec<[usize; 2]>,
    radii: Vec<f64>,
    lengths: Vec<f64>,
    kr: f64,
    kx: f64,
    matrix: TreeMatrix,
    at_wilting_point: bool,
}

impl XylemNetwork {
    /// Allocates a new instance
    ///
    /// # Input
    ///
    /// * `geometry` -- the root system
    /// * `kr` -- radial conductivity (1/day)
    /// * `kx` -- axial conductance (cm³/day)
    pub fn new(geometry: &RootGeometry, kr: f64, kx: f64) -> Result<Self, Error> {
        if kr < 0.0 || !(kx > 0.0) {
            return Err(Error::InvalidParameter("kr must be ≥ 0.0 and kx must be > 0.0".to_string()));
        }
        let matrix = TreeMatrix::new(geometry.n_nodes(), geometry.segments(), 0)?;
        Ok(XylemNetwork {
            z: geometry.nodes().iter().map(|x| x[2]).collect(),
            segments: geometry.segments().to_vec(),
            radii: geometry.radii().to_vec(),
            lengths: geometry.lengths().to_vec(),
            kr,
            kx,
            matrix,
            at_wilting_point: false,
        })
    }

    /// Returns true if the last solve switched the collar to the wilting point
    pub fn at_wilting_point(&self) -> bool {
        self.at_wilting_point
    }

    /// Returns the radial conductance (cm²/day) of segment j
    fn radial_conductance(&self, j: usize, soil_k: &[f64]) -> f64 {
        let ks = soil_k[j];
        let sum = self.kr + ks;
        let kr_eff = if ks == f64::INFINITY {
            self.kr
        } else if sum > 0.0 {
            self.kr * ks / sum
        } else {
            0.0
        };
        2.0 * PI * self.radii[j] * self.lengths[j] * kr_eff
    }

    /// Assembles the linear system with the collar as a Neumann node
    fn assemble(&mut self, demand: f64, hs: &[f64], soil_k: &[f64]) -> Result<Array1<f64>, Error> {
        let n = self.z.len();
        let mut bb = Array1::zeros(n);
        self.matrix.reset();
        for (j, seg) in self.segments.iter().enumerate() {
            let [a, b] = *seg;
            let cx = self.kx / self.lengths[j];
            let cr = self.radial_conductance(j, soil_k);
            let dz = self.z[a] - self.z[b];
            self.matrix.add(a, a, cx + 0.25 * cr)?;
            self.matrix.add(a, b, -cx + 0.25 * cr)?;
            bb[a] += -cx * dz + 0.5 * cr * hs[j];
            self.matrix.add(b, b, cx + 0.25 * cr)?;
            self.matrix.add(b, a, -cx + 0.25 * cr)?;
            bb[b] += cx * dz + 0.5 * cr * hs[j];
        }
        bb[0] -= demand;
        Ok(bb)
    }

    fn check_sizes(&self, interface_heads: &[f64], soil_k: &[f64]) -> Result<(), Error> {
        let ns = self.segments.len();
        if interface_heads.len() != ns || soil_k.len() != ns {
            return Err(Error::Collaborator(format!(
                "expected {} interface heads and conductances; got {} and {}",
                ns,
                interface_heads.len(),
                soil_k.len()
            )));
        }
        Ok(())
    }
}

impl RootNetwork for XylemNetwork {
    fn solve(
        &mut self,
        _t: f64,
        demand: f64,
        interface_heads: &[f64],
        wilting_point: f64,
        soil_k: &[f64],
    ) -> Result<Vec<f64>, Error> {
        self.check_sizes(interface_heads, soil_k)?;
        let mut bb = self.assemble(demand, interface_heads, soil_k)?;
        let mut neumann = bb.clone();
        self.at_wilting_point = false;
        match self.matrix.solve(&mut neumann) {
            Ok(()) if neumann[0] >= wilting_point => return Ok(neumann.to_vec()),
            Ok(()) | Err(Error::SingularMatrix(_)) => (),
            Err(e) => return Err(e),
        }

        // Dirichlet at the collar
        self.at_wilting_point = true;
        self.matrix.clear_row(0);
        self.matrix.add(0, 0, 1.0)?;
        bb[0] = wilting_point;
        self.matrix
            .solve(&mut bb)
            .map_err(|e| Error::Collaborator(format!("xylem network: {}", e)))?;
        Ok(bb.to_vec())
    }

    fn segment_fluxes(&self, rx: &[f64], interface_heads: &[f64], soil_k: &[f64]) -> Vec<f64> {
        self.segments
            .iter()
            .enumerate()
            .map(|(j, seg)| {
                let p_mid = 0.5 * (rx[seg[0]] + rx[seg[1]]);
                -self.radial_conductance(j, soil_k) * (interface_heads[j] - p_mid)
            })
            .collect()
    }

    fn collar_flux(&self, rx: &[f64], interface_heads: &[f64], soil_k: &[f64]) -> f64 {
        // inflow into node 0 from its segments
        let mut flux = 0.0;
        for (j, seg) in self.segments.iter().enumerate() {
            let [a, b] = *seg;
            if a != 0 && b != 0 {
                continue;
            }
            let other = if a == 0 { b } else { a };
            let cx = self.kx / self.lengths[j];
            let cr = self.radial_conductance(j, soil_k);
            let p_mid = 0.5 * (rx[a] + rx[b]);
            flux += cx * (rx[other] + self.z[other] - rx[0] - self.z[0]);
            flux += 0.5 * cr * (interface_heads[j] - p_mid);
        }
        flux
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
