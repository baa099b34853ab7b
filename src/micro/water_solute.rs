use super::{AdvectionDiffusion, RichardsCyl};
use crate::base::Error;
use ndarray::{Array2, Axis};

/// Advances a Richards model and a solute model on the same grid together
///
/// Each substep solves the water first. The solute then takes the water contents and the
/// Darcy velocities at the end of that substep and is advanced over the same interval.
#[derive(Clone, Debug)]
pub struct WaterSolute {
    water: RichardsCyl,
    solute: AdvectionDiffusion,
}

impl WaterSolute {
    /// Allocates a new instance (both models must use the same grid)
    pub fn new(water: RichardsCyl, mut solute: AdvectionDiffusion) -> Result<Self, Error> {
        solute.set_water(&water)?;
        Ok(WaterSolute { water, solute })
    }

    /// Advances both models to a sequence of checkpoints (relative to the water model's clock)
    ///
    /// Returns the heads and the concentrations at each checkpoint (one row per checkpoint).
    /// An empty list of checkpoints returns the current state as 1 × ndof arrays.
    pub fn solve(&mut self, target_times: &[f64], max_substep: f64) -> Result<(Array2<f64>, Array2<f64>), Error> {
        if target_times.is_empty() {
            return Ok((
                self.water.heads().clone().insert_axis(Axis(0)),
                self.solute.concentrations().clone().insert_axis(Axis(0)),
            ));
        }
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

        let ndof = self.water.grid().ndof();
        let mut heads = Array2::zeros((target_times.len(), ndof));
        let mut concentrations = Array2::zeros((target_times.len(), ndof));
        let t0 = self.water.time();
        for (k, target) in target_times.iter().enumerate() {
            let t_end = t0 + target;
            let eps = 1e-12 * f64::max(1.0, f64::abs(t_end));
            while t_end - self.water.time() > eps {
                let dt = f64::min(max_substep, t_end - self.water.time());
                self.water.solve(&[dt], dt)?;
                self.solute.set_water(&self.water)?;
                self.solute.solve(&[dt], dt)?;
            }
            heads.row_mut(k).assign(self.water.heads());
            concentrations.row_mut(k).assign(self.solute.concentrations());
        }
        Ok((heads, concentrations))
    }

    pub fn water(&self) -> &RichardsCyl {
        &self.water
    }

    /// Gives access to the water model (e.g., to change its boundary conditions)
    pub fn water_mut(&mut self) -> &mut RichardsCyl {
        &mut self.water
    }

    pub fn solute(&self) -> &AdvectionDiffusion {
        &self.solute
    }

    pub fn solute_mut(&mut self) -> &mut AdvectionDiffusion {
        &mut self.solute
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::WaterSolute;
    use crate::base::{Error, SolverConfig};
    use crate::material::VanGenuchten;
    use crate::micro::{AdvectionDiffusion, RadialGrid, RichardsCyl, SoluteBc, WaterBc};
    use russell_chk::approx_eq;
    use std::sync::Arc;

    fn uptake_model() -> Result<WaterSolute, Error> {
        let grid = RadialGrid::linear(0.05, 1.0, 21)?;
        let dx = grid.inner_spacing();
        let soil = Arc::new(VanGenuchten::sample_loam());
        let mut water = RichardsCyl::new(grid.clone(), soil, SolverConfig::new())?;
        water.set_uniform_head(-100.0)?.set_bc_inner(WaterBc::FluxOut {
            flux: -0.5,
            critical_head: -15000.0,
            length: dx,
        });

        // no diffusion, thus the solute moves only with the water
        let mut solute = AdvectionDiffusion::new(grid, 0.3, 0.0)?;
        let values: Vec<_> = (0..20).map(|i| if i < 10 { 0.0 } else { 1.0 }).collect();
        solute.set_concentrations(&values)?;
        WaterSolute::new(water, solute)
    }

    #[test]
    fn new_captures_errors() -> Result<(), Error> {
        let soil = Arc::new(VanGenuchten::sample_loam());
        let water = RichardsCyl::new(RadialGrid::linear(0.05, 1.0, 21)?, soil, SolverConfig::new())?;
        let solute = AdvectionDiffusion::new(RadialGrid::linear(0.05, 0.9, 21)?, 0.3, 0.1)?;
        assert!(WaterSolute::new(water, solute).is_err());
        let mut model = uptake_model()?;
        assert!(model.solve(&[1.0], 0.0).is_err());
        assert!(model.solve(&[1.0, 0.5], 0.1).is_err());
        let (h, c) = model.solve(&[], 0.1)?;
        assert_eq!(h.dim(), (1, 20));
        assert_eq!(c.row(0), model.solute().concentrations().view());
        Ok(())
    }

    #[test]
    fn uptake_carries_the_solute_to_the_root() -> Result<(), Error> {
        let mut model = uptake_model()?;
        let m0 = model.solute().mass();
        let (heads, conc) = model.solve(&[0.5, 1.0], 0.05)?;
        assert_eq!(heads.dim(), (2, 20));
        assert_eq!(conc.dim(), (2, 20));
        approx_eq(model.water().time(), 1.0, 1e-14);
        approx_eq(model.solute().time(), 1.0, 1e-14);

        // the water flows toward the root
        assert!(model.water().inner_flux() < 0.0);
        assert!(model.water().darcy_velocities()[0] < 0.0);
        assert!(heads[[1, 0]] < heads[[1, 19]]);

        // the solute arrives at the root surface, which does not take it
        assert!(conc[[0, 0]] > 0.0);
        assert!(conc[[1, 0]] > conc[[0, 0]]);
        approx_eq(model.solute().mass(), m0, 1e-12);
        assert!(model.solute().concentrations().iter().all(|c| *c >= 0.0));

        // changing the boundary conditions through the accessors
        model.water_mut().set_bc_inner(WaterBc::NoFlux);
        model.solute_mut().set_bc_inner(SoluteBc::NoFlux);
        model.solve(&[0.1], 0.05)?;
        approx_eq(model.solute().mass(), m0, 1e-12);
        Ok(())
    }
}
