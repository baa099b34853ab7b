use super::{RadialGrid, WaterBc};
use crate::base::{Error, FaceMean, SolverConfig, Tridiagonal};
use crate::material::VanGenuchten;
use ndarray::{Array1, Array2, Axis};
use std::sync::Arc;

/// Relative tolerance used to decide whether a checkpoint has been reached
const T_EPS: f64 = 1e-12;

/// Calculates the volumetric flow through a face from the left cell to the right cell
///
/// The result is `area · K̄ · (h_left − h_right) / dr`, thus it reverses sign when the head
/// difference reverses sign.
///
/// # Input
///
/// * `k_left`, `k_right` -- conductivities of the two cells (≥ 0)
/// * `h_left`, `h_right` -- heads of the two cells
/// * `dr` -- distance between the cell centers
/// * `area` -- face area (per unit axial length)
/// * `mean` -- averaging of the face conductivity
pub fn face_flux(k_left: f64, k_right: f64, h_left: f64, h_right: f64, dr: f64, area: f64, mean: FaceMean) -> f64 {
    let (kf, _, _) = mean.eval(k_left, k_right);
    area * kf * (h_left - h_right) / dr
}

/// Solves the Richards equation on a cylindrical soil domain around a root segment
///
/// The unknowns are the pressure heads (cm) at the cell centers of a [RadialGrid]. The equation
/// is discretized with the mixed form and backward Euler:
///
/// ```text
/// Vᵢ (θ(hᵢ) − θ(hᵢⁿ)) / Δt = Σ Aₖ K̄ₖ (h_nb − hᵢ) / Δrₖ + A_b q_b
/// ```
///
/// where `q_b` is the flux density given by the [WaterBc] at the inner or outer boundary.
/// Newton's method solves each substep; failed substeps are halved and retried.
#[derive(Clone, Debug)]
pub struct RichardsCyl {
    grid: RadialGrid,
    soil: Arc<VanGenuchten>,
    config: SolverConfig,

    /// Heads at the cell centers
    h: Array1<f64>,

    /// Heads at the beginning of the substep
    h_old: Array1<f64>,

    /// Water contents at the beginning of the substep
    theta_old: Array1<f64>,

    /// Residual vector
    rr: Array1<f64>,

    /// Jacobian matrix ∂R/∂h
    jj: Tridiagonal,

    /// Distances between neighbouring cell centers (ndof − 1)
    dr: Vec<f64>,

    /// Internal clock
    t: f64,

    /// Boundary condition at the root surface
    bc_inner: WaterBc,

    /// Boundary condition at the outer radius
    bc_outer: WaterBc,

    /// Suggested substep for the next solve
    dt_suggest: f64,

    /// Number of consecutive successful substeps
    n_success: usize,

    /// Last accepted substep
    last_dt: f64,

    /// ∫ q_inner dt over the last solve
    inner_integral: f64,

    /// ∫ q_outer dt over the last solve
    outer_integral: f64,

    /// Time covered by the last solve
    elapsed: f64,
}

impl RichardsCyl {
    /// Allocates a new instance with a uniform head of zero and no-flux boundaries
    pub fn new(grid: RadialGrid, soil: Arc<VanGenuchten>, config: SolverConfig) -> Result<Self, Error> {
        if let Some(msg) = config.validate() {
            return Err(Error::InvalidParameter(msg));
        }
        let ndof = grid.ndof();
        let centers = grid.centers();
        let dr = (1..ndof).map(|i| centers[i] - centers[i - 1]).collect();
        Ok(RichardsCyl {
            grid,
            soil,
            h: Array1::zeros(ndof),
            h_old: Array1::zeros(ndof),
            theta_old: Array1::zeros(ndof),
            rr: Array1::zeros(ndof),
            jj: Tridiagonal::new(ndof),
            dr,
            t: 0.0,
            bc_inner: WaterBc::NoFlux,
            bc_outer: WaterBc::NoFlux,
            dt_suggest: config.dt_ini,
            n_success: 0,
            last_dt: 0.0,
            inner_integral: 0.0,
            outer_integral: 0.0,
            elapsed: 0.0,
            config,
        })
    }

    /// Sets the initial heads (one per cell)
    pub fn set_initial_heads(&mut self, heads: &[f64]) -> Result<&mut Self, Error> {
        if heads.len() != self.grid.ndof() {
            return Err(Error::InvalidParameter(format!(
                "the number of heads ({}) must equal the number of cells ({})",
                heads.len(),
                self.grid.ndof()
            )));
        }
        if heads.iter().any(|h| !h.is_finite()) {
            return Err(Error::InvalidParameter("initial heads must be finite".to_string()));
        }
        for (h, value) in self.h.iter_mut().zip(heads) {
            *h = *value;
        }
        Ok(self)
    }

    /// Sets the same initial head in all cells
    pub fn set_uniform_head(&mut self, head: f64) -> Result<&mut Self, Error> {
        if !head.is_finite() {
            return Err(Error::InvalidParameter("initial heads must be finite".to_string()));
        }
        self.h.fill(head);
        Ok(self)
    }

    /// Sets the boundary condition at the root surface
    pub fn set_bc_inner(&mut self, bc: WaterBc) -> &mut Self {
        self.bc_inner = bc;
        self
    }

    /// Sets the boundary condition at the outer radius
    pub fn set_bc_outer(&mut self, bc: WaterBc) -> &mut Self {
        self.bc_outer = bc;
        self
    }

    /// Advances the solution to a sequence of checkpoints
    ///
    /// # Input
    ///
    /// * `target_times` -- ascending checkpoint times, relative to the current internal time
    /// * `max_substep` -- upper bound of the internal substep
    ///
    /// # Output
    ///
    /// Returns the heads at each checkpoint (one row per checkpoint). An empty list of
    /// checkpoints leaves the state untouched and returns the current heads as a 1 × ndof array.
    pub fn solve(&mut self, target_times: &[f64], max_substep: f64) -> Result<Array2<f64>, Error> {
        if target_times.is_empty() {
            return Ok(self.h.clone().insert_axis(Axis(0)));
        }
        let ndof = self.grid.ndof();
        let mut results = Array2::zeros((target_times.len(), ndof));
        if !(max_substep > 0.0) {
            return Err(Error::InvalidParameter("max_substep must be > 0.0".to_string()));
        }
        let mut previous = 0.0;
        for target in target_times {
            if !target.is_finite() || *target < previous {
                return Err(Error::InvalidParameter(
                    "checkpoint times must be finite, non-negative and ascending".to_string(),
                ));
            }
            previous = *target;
        }

        // reset the flux accumulators
        self.inner_integral = 0.0;
        self.outer_integral = 0.0;
        self.elapsed = 0.0;
        self.print_header();

        let t0 = self.t;
        let mut substep = 0;
        for (k, target) in target_times.iter().enumerate() {
            let t_end = t0 + target;
            let eps = T_EPS * f64::max(1.0, f64::abs(t_end));
            while t_end - self.t > eps {
                let remaining = t_end - self.t;
                let mut dt = f64::min(self.dt_suggest, max_substep);
                let truncated = dt >= remaining * (1.0 - 1e-6);
                if truncated {
                    dt = remaining;
                }

                // substep with retries
                loop {
                    self.print_timestep(substep, self.t, dt);
                    match self.iterate(dt)? {
                        Some(_) => break,
                        None => {
                            self.h.assign(&self.h_old);
                            self.n_success = 0;
                            if 0.5 * dt < self.config.dt_min {
                                self.print_footer();
                                return Err(Error::Convergence {
                                    segment: None,
                                    t: self.t,
                                    dt,
                                    iterations: self.config.n_max_iterations,
                                });
                            }
                            dt *= 0.5;
                            self.dt_suggest = dt;
                        }
                    }
                }

                // accept
                let (q_in, q_out) = self.boundary_fluxes();
                self.inner_integral += q_in * dt;
                self.outer_integral += q_out * dt;
                self.elapsed += dt;
                self.t += dt;
                self.last_dt = dt;
                substep += 1;
                self.n_success += 1;
                if !truncated {
                    self.dt_suggest = dt;
                }
                if self.n_success >= self.config.n_grow_after {
                    self.dt_suggest = f64::min(self.dt_suggest * self.config.dt_growth, max_substep);
                    self.n_success = 0;
                }
            }
            self.t = t_end;
            results.row_mut(k).assign(&self.h);
        }
        self.print_footer();
        Ok(results)
    }

    /// Runs the Newton iterations of one substep
    ///
    /// Returns the number of iterations, or None if the iterations did not converge.
    fn iterate(&mut self, dt: f64) -> Result<Option<usize>, Error> {
        let ndof = self.grid.ndof();
        self.h_old.assign(&self.h);
        for i in 0..ndof {
            self.theta_old[i] = self.soil.water_content(self.h_old[i]);
        }
        for it in 0..self.config.n_max_iterations {
            self.assemble(dt);

            // check the mass residual
            let volumes = self.grid.volumes();
            let mut norm_rr = 0.0;
            for i in 0..ndof {
                norm_rr = f64::max(norm_rr, f64::abs(self.rr[i]) * dt / volumes[i]);
            }
            if !norm_rr.is_finite() {
                return Ok(None);
            }
            if norm_rr < self.config.tol_residual {
                self.print_iteration(it, None, norm_rr);
                return Ok(Some(it));
            }

            // update
            let mut mdh = self.rr.clone();
            match self.jj.solve(&mut mdh) {
                Ok(()) => (),
                Err(Error::SingularMatrix(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
            let mut rel_dh = 0.0;
            for i in 0..ndof {
                self.h[i] -= mdh[i];
                rel_dh = f64::max(rel_dh, f64::abs(mdh[i]) / (1.0 + f64::abs(self.h[i])));
            }
            self.print_iteration(it, Some(rel_dh), norm_rr);
            if !rel_dh.is_finite() {
                return Ok(None);
            }
            if rel_dh < self.config.tol_rel_dh {
                return Ok(Some(it + 1));
            }
        }
        Ok(None)
    }

    /// Computes the residual and the Jacobian at the current heads
    fn assemble(&mut self, dt: f64) {
        let ndof = self.grid.ndof();
        let soil = self.soil.as_ref();
        let volumes = self.grid.volumes();
        self.jj.reset();

        // storage
        for i in 0..ndof {
            let h = self.h[i];
            self.rr[i] = volumes[i] * (soil.water_content(h) - self.theta_old[i]) / dt;
            self.jj.dia[i] = volumes[i] * soil.specific_moisture_capacity(h) / dt;
        }

        // interior faces: flow f from cell i to cell i+1 leaves i and enters i+1
        for i in 0..ndof.saturating_sub(1) {
            let (hl, hr) = (self.h[i], self.h[i + 1]);
            let (kl, kr) = (soil.hydraulic_conductivity(hl), soil.hydraulic_conductivity(hr));
            let (kf, dkf_dkl, dkf_dkr) = self.config.face_mean.eval(kl, kr);
            let g = self.grid.face_area(i + 1) / self.dr[i];
            let f = g * kf * (hl - hr);
            let df_dhl = g * (dkf_dkl * soil.dk_dh(hl) * (hl - hr) + kf);
            let df_dhr = g * (dkf_dkr * soil.dk_dh(hr) * (hl - hr) - kf);
            self.rr[i] += f;
            self.rr[i + 1] -= f;
            self.jj.dia[i] += df_dhl;
            self.jj.upp[i] += df_dhr;
            self.jj.low[i + 1] -= df_dhl;
            self.jj.dia[i + 1] -= df_dhr;
        }

        // boundaries (inflow reduces the residual)
        let last = ndof - 1;
        let (q, dq) = self.bc_inner.flux(self.h[0], soil);
        let area = self.grid.face_area(0);
        self.rr[0] -= area * q;
        self.jj.dia[0] -= area * dq;
        let (q, dq) = self.bc_outer.flux(self.h[last], soil);
        let area = self.grid.face_area(ndof);
        self.rr[last] -= area * q;
        self.jj.dia[last] -= area * dq;
    }

    /// Returns the boundary flux densities into the domain at the current heads
    fn boundary_fluxes(&self) -> (f64, f64) {
        let soil = self.soil.as_ref();
        let (q_in, _) = self.bc_inner.flux(self.h[0], soil);
        let (q_out, _) = self.bc_outer.flux(self.h[self.grid.ndof() - 1], soil);
        (q_in, q_out)
    }

    /// Returns the grid
    pub fn grid(&self) -> &RadialGrid {
        &self.grid
    }

    /// Returns the soil parameters
    pub fn soil(&self) -> &VanGenuchten {
        self.soil.as_ref()
    }

    /// Returns the heads at the cell centers
    pub fn heads(&self) -> &Array1<f64> {
        &self.h
    }

    /// Returns the internal clock
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Returns the boundary condition at the root surface
    pub fn bc_inner(&self) -> &WaterBc {
        &self.bc_inner
    }

    /// Returns the boundary condition at the outer radius
    pub fn bc_outer(&self) -> &WaterBc {
        &self.bc_outer
    }

    /// Returns the head of the cell next to the root surface
    pub fn inner_head(&self) -> f64 {
        self.h[0]
    }

    /// Returns the head of the outermost cell
    pub fn outer_head(&self) -> f64 {
        self.h[self.grid.ndof() - 1]
    }

    /// Returns the water contents at the cell centers
    pub fn water_contents(&self) -> Array1<f64> {
        self.h.mapv(|h| self.soil.water_content(h))
    }

    /// Returns the stored water per unit length Σ θᵢ Vᵢ (cm²)
    pub fn water_volume(&self) -> f64 {
        let volumes = self.grid.volumes();
        self.h
            .iter()
            .zip(volumes)
            .map(|(h, v)| self.soil.water_content(*h) * v)
            .sum()
    }

    /// Returns the mean flux density (cm/day) into the domain at the root surface
    ///
    /// The mean is taken over the last call to [RichardsCyl::solve]; before any solve, the
    /// flux at the current state is returned. Negative values mean uptake by the root.
    pub fn inner_flux(&self) -> f64 {
        if self.elapsed > 0.0 {
            self.inner_integral / self.elapsed
        } else {
            self.boundary_fluxes().0
        }
    }

    /// Returns the mean flux density (cm/day) into the domain at the outer radius
    pub fn outer_flux(&self) -> f64 {
        if self.elapsed > 0.0 {
            self.outer_integral / self.elapsed
        } else {
            self.boundary_fluxes().1
        }
    }

    /// Returns ∫ q dt (cm) at the root surface over the last solve
    pub fn inner_flux_integral(&self) -> f64 {
        self.inner_integral
    }

    /// Returns the Darcy velocities (cm/day) at the interior faces, positive outward
    pub fn darcy_velocities(&self) -> Array1<f64> {
        let ndof = self.grid.ndof();
        let soil = self.soil.as_ref();
        Array1::from_iter((0..ndof.saturating_sub(1)).map(|i| {
            let (hl, hr) = (self.h[i], self.h[i + 1]);
            let (kl, kr) = (soil.hydraulic_conductivity(hl), soil.hydraulic_conductivity(hr));
            face_flux(kl, kr, hl, hr, self.dr[i], 1.0, self.config.face_mean)
        }))
    }

    /// Returns the last accepted substep
    pub fn last_dt(&self) -> f64 {
        self.last_dt
    }

    /// Prints the header of the substepping table
    fn print_header(&self) {
        if self.config.verbose_timesteps || self.config.verbose_iterations {
            println!("\nRHIZOSIM === SUBSTEPPING AND CONVERGENCE STATISTICS =========================");
            println!("\"iter\" means iteration\n");
            println!("{}", "─".repeat(79));
            println!(
                "{:8} {:>11} {:>11} {:>5} {:>9} {:>9}",
                "substep", "t", "Δt", "iter", "rel(δh)", "‖R‖∞Δt/V"
            );
            println!("{}", "─".repeat(79));
        }
    }

    fn print_timestep(&self, substep: usize, t: f64, dt: f64) {
        if self.config.verbose_timesteps {
            println!("{:>8} {:>11.6e} {:>11.6e}", substep + 1, t, dt);
        }
    }

    fn print_iteration(&self, it: usize, rel_dh: Option<f64>, norm_rr: f64) {
        if self.config.verbose_iterations {
            match rel_dh {
                Some(rel) => println!(
                    "{:>8} {:>11} {:>11} {:>5} {:>9.2e} {:>9.2e}",
                    "·", "·", "·", it, rel, norm_rr
                ),
                None => println!(
                    "{:>8} {:>11} {:>11} {:>5} {:>9} {:>9.2e}",
                    "·", "·", "·", it, "·", norm_rr
                ),
            }
        }
    }

    fn print_footer(&self) {
        if self.config.verbose_timesteps || self.config.verbose_iterations {
            println!("{}", "─".repeat(79));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
