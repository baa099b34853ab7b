use super::{RadialGrid, RichardsCyl, SoluteBc};
use crate::base::{Error, Tridiagonal};
use ndarray::{Array1, Array2, Axis};

/// Solves the radial advection-diffusion equation of a solute around a root segment
///
/// ```text
/// b ∂c/∂t = (1/r) ∂/∂r ( r (D ∂c/∂r − u c) )      D = d0 θ
/// ```
///
/// The water contents θ and the Darcy velocities u are taken from a snapshot of a
/// [RichardsCyl] model ([AdvectionDiffusion::set_water]). Advection uses upwinding at the
/// interior faces; the boundaries exchange solute only through the [SoluteBc] fluxes.
/// The scheme is linear and implicit, thus each substep requires one tridiagonal solve.
#[derive(Clone, Debug)]
pub struct AdvectionDiffusion {
    grid: RadialGrid,

    /// Concentrations at the cell centers
    c: Array1<f64>,

    /// Buffer power
    b: Array1<f64>,

    /// Molecular diffusion coefficient (cm²/day)
    d0: Array1<f64>,

    /// Water contents
    theta: Array1<f64>,

    /// Darcy velocities at the interior faces (positive outward)
    u: Array1<f64>,

    /// Distances between neighbouring cell centers
    dr: Vec<f64>,

    jj: Tridiagonal,
    t: f64,
    bc_inner: SoluteBc,
    bc_outer: SoluteBc,
}

impl AdvectionDiffusion {
    /// Allocates a new instance with zero concentration, unit buffer power and water at rest
    ///
    /// # Input
    ///
    /// * `grid` -- the radial grid
    /// * `water_content` -- uniform water content used until a snapshot is given
    /// * `d0` -- uniform molecular diffusion coefficient (cm²/day)
    pub fn new(grid: RadialGrid, water_content: f64, d0: f64) -> Result<Self, Error> {
        if !(water_content > 0.0 && water_content <= 1.0) {
            return Err(Error::InvalidParameter("water content must be in (0, 1]".to_string()));
        }
        if d0 < 0.0 {
            return Err(Error::InvalidParameter("diffusion coefficient must be ≥ 0.0".to_string()));
        }
        let ndof = grid.ndof();
        let centers = grid.centers();
        let dr = (1..ndof).map(|i| centers[i] - centers[i - 1]).collect();
        Ok(AdvectionDiffusion {
            c: Array1::zeros(ndof),
            b: Array1::ones(ndof),
            d0: Array1::from_elem(ndof, d0),
            theta: Array1::from_elem(ndof, water_content),
            u: Array1::zeros(ndof.saturating_sub(1)),
            dr,
            jj: Tridiagonal::new(ndof),
            t: 0.0,
            bc_inner: SoluteBc::NoFlux,
            bc_outer: SoluteBc::NoFlux,
            grid,
        })
    }

    /// Sets the same concentration in all cells
    pub fn set_uniform_concentration(&mut self, value: f64) -> Result<&mut Self, Error> {
        if value < 0.0 {
            return Err(Error::InvalidParameter("concentration must be ≥ 0.0".to_string()));
        }
        self.c.fill(value);
        Ok(self)
    }

    /// Sets the concentrations (one per cell)
    pub fn set_concentrations(&mut self, values: &[f64]) -> Result<&mut Self, Error> {
        self.c = self.cell_array(values, "concentrations")?;
        Ok(self)
    }

    /// Sets the buffer power of all cells
    pub fn set_buffer_power(&mut self, value: f64) -> Result<&mut Self, Error> {
        if !(value > 0.0) {
            return Err(Error::InvalidParameter("buffer power must be > 0.0".to_string()));
        }
        self.b.fill(value);
        Ok(self)
    }

    /// Sets the molecular diffusion coefficient per cell
    pub fn set_diffusion(&mut self, values: &[f64]) -> Result<&mut Self, Error> {
        self.d0 = self.cell_array(values, "diffusion coefficients")?;
        Ok(self)
    }

    /// Takes the water contents and Darcy velocities from a Richards model on the same grid
    pub fn set_water(&mut self, richards: &RichardsCyl) -> Result<&mut Self, Error> {
        if richards.grid().nodes() != self.grid.nodes() {
            return Err(Error::InvalidGeometry(
                "the Richards model must use the same grid".to_string(),
            ));
        }
        self.theta = richards.water_contents();
        self.u = richards.darcy_velocities();
        Ok(self)
    }

    /// Sets the boundary condition at the root surface
    pub fn set_bc_inner(&mut self, bc: SoluteBc) -> &mut Self {
        self.bc_inner = bc;
        self
    }

    /// Sets the boundary condition at the outer radius
    pub fn set_bc_outer(&mut self, bc: SoluteBc) -> &mut Self {
        self.bc_outer = bc;
        self
    }

    /// Advances the solution to a sequence of checkpoints (relative to the internal time)
    ///
    /// Returns the concentrations at each checkpoint (one row per checkpoint). An empty list
    /// of checkpoints returns the current concentrations as a 1 × ndof array.
    pub fn solve(&mut self, target_times: &[f64], max_substep: f64) -> Result<Array2<f64>, Error> {
        if target_times.is_empty() {
            return Ok(self.c.clone().insert_axis(Axis(0)));
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
        let t0 = self.t;
        for (k, target) in target_times.iter().enumerate() {
            let t_end = t0 + target;
            let eps = 1e-12 * f64::max(1.0, f64::abs(t_end));
            while t_end - self.t > eps {
                let dt = f64::min(max_substep, t_end - self.t);
                self.substep(dt)?;
                self.t += dt;
            }
            self.t = t_end;
            results.row_mut(k).assign(&self.c);
        }
        Ok(results)
    }

    /// Performs one implicit substep
    fn substep(&mut self, dt: f64) -> Result<(), Error> {
        let ndof = self.grid.ndof();
        let volumes = self.grid.volumes();
        self.jj.reset();
        let mut rhs = Array1::zeros(ndof);

        // storage
        for i in 0..ndof {
            let s = volumes[i] * self.b[i] / dt;
            self.jj.dia[i] = s;
            rhs[i] = s * self.c[i];
        }

        // interior faces: flow from i to i+1 equals gl·c[i] + gr·c[i+1]
        for i in 0..ndof.saturating_sub(1) {
            let area = self.grid.face_area(i + 1);
            let dl = self.d0[i] * self.theta[i];
            let dr = self.d0[i + 1] * self.theta[i + 1];
            let d_face = if dl + dr > 0.0 { 2.0 * dl * dr / (dl + dr) } else { 0.0 };
            let g = area * d_face / self.dr[i];
            let u = self.u[i];
            let gl = g + area * f64::max(u, 0.0);
            let gr = -g + area * f64::min(u, 0.0);
            self.jj.dia[i] += gl;
            self.jj.upp[i] += gr;
            self.jj.low[i + 1] -= gl;
            self.jj.dia[i + 1] -= gr;
        }

        // boundaries: inflow a + b·c
        let last = ndof - 1;
        let (a, b) = self.bc_inner.flux_coefficients(self.d0[0] * self.theta[0]);
        let area = self.grid.face_area(0);
        rhs[0] += area * a;
        self.jj.dia[0] -= area * b;
        let (a, b) = self.bc_outer.flux_coefficients(self.d0[last] * self.theta[last]);
        let area = self.grid.face_area(ndof);
        rhs[last] += area * a;
        self.jj.dia[last] -= area * b;

        self.jj.solve(&mut rhs)?;
        self.c = rhs;
        Ok(())
    }

    /// Returns the concentrations at the cell centers
    pub fn concentrations(&self) -> &Array1<f64> {
        &self.c
    }

    /// Returns the internal clock
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Returns the solute mass per unit length Σ bᵢ cᵢ Vᵢ
    pub fn mass(&self) -> f64 {
        let volumes = self.grid.volumes();
        (0..self.grid.ndof()).map(|i| self.b[i] * self.c[i] * volumes[i]).sum()
    }

    fn cell_array(&self, values: &[f64], name: &str) -> Result<Array1<f64>, Error> {
        if values.len() != self.grid.ndof() {
            return Err(Error::InvalidParameter(format!(
                "the number of {} ({}) must equal the number of cells ({})",
                name,
                values.len(),
                self.grid.ndof()
            )));
        }
        if values.iter().any(|v| !(*v >= 0.0) || !v.is_finite()) {
            return Err(Error::InvalidParameter(format!("{} must be finite and ≥ 0.0", name)));
        }
        Ok(Array1::from(values.to_vec()))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::AdvectionDiffusion;
    use crate::base::{Error, SolverConfig};
    use crate::material::VanGenuchten;
    use crate::micro::{RadialGrid, RichardsCyl, SoluteBc};
    use russell_chk::approx_eq;
    use std::sync::Arc;

    #[test]
    fn new_captures_errors() -> Result<(), Error> {
        let grid = RadialGrid::new(0.02, 0.6, 6, 1.5)?;
        assert!(AdvectionDiffusion::new(grid.clone(), 0.0, 1.0).is_err());
        assert!(AdvectionDiffusion::new(grid.clone(), 0.3, -1.0).is_err());
        let mut ad = AdvectionDiffusion::new(grid, 0.3, 1.0)?;
        assert!(ad.set_concentrations(&[1.0, 2.0]).is_err());
        assert!(ad.set_diffusion(&[1.0, -1.0, 1.0, 1.0, 1.0]).is_err());
        assert!(ad.set_buffer_power(0.0).is_err());
        assert!(ad.set_uniform_concentration(-1.0).is_err());
        let other = RadialGrid::new(0.02, 0.5, 6, 1.5)?;
        let rich = RichardsCyl::new(other, Arc::new(VanGenuchten::sample_loam()), SolverConfig::new())?;
        assert!(ad.set_water(&rich).is_err());
        Ok(())
    }

    #[test]
    fn closed_domain_conserves_mass() -> Result<(), Error> {
        let grid = RadialGrid::new(0.02, 0.6, 21, 1.2)?;
        let soil = Arc::new(VanGenuchten::sample_loam());
        let mut rich = RichardsCyl::new(grid.clone(), soil, SolverConfig::new())?;
        let heads: Vec<_> = (0..20).map(|i| -500.0 + 20.0 * (i as f64)).collect();
        rich.set_initial_heads(&heads)?;

        let mut ad = AdvectionDiffusion::new(grid, 0.3, 0.5)?;
        let values: Vec<_> = (0..20).map(|i| if i < 10 { 1.0 } else { 0.0 }).collect();
        ad.set_concentrations(&values)?.set_buffer_power(2.0)?.set_water(&rich)?;
        let m0 = ad.mass();
        assert_eq!(ad.solve(&[], 0.1)?.row(0), ndarray::arr1(&values));
        let res = ad.solve(&[0.5, 1.0], 0.1)?;
        assert_eq!(res.dim(), (2, 20));
        approx_eq(ad.mass(), m0, 1e-12);
        assert!(ad.concentrations().iter().all(|c| *c >= 0.0));
        approx_eq(ad.time(), 1.0, 1e-15);
        Ok(())
    }

    #[test]
    fn imposed_flux_adds_mass() -> Result<(), Error> {
        let grid = RadialGrid::linear(1.0, 2.0, 5)?;
        let mut ad = AdvectionDiffusion::new(grid, 0.4, 0.1)?;
        ad.set_bc_inner(SoluteBc::Flux { flux: 0.5 });
        ad.solve(&[2.0], 0.5)?;
        // inflow per unit length: 2π r_in q t
        approx_eq(ad.mass(), 2.0 * std::f64::consts::PI * 0.5 * 2.0, 1e-12);
        Ok(())
    }
}
