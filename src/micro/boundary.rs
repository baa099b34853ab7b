use crate::material::VanGenuchten;
use serde::{Deserialize, Serialize};

/// Defines the boundary conditions of the radial Richards equation
///
/// All fluxes are flux densities (cm/day) with positive values pointing into the soil domain,
/// i.e., away from the root at the inner boundary and toward the root at the outer boundary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum WaterBc {
    /// Zero flux
    NoFlux,

    /// Imposed flux limited by the soil's ability to deliver or absorb water
    ///
    /// Outflow is limited by `K(h)(h − critical_head)/length`; inflow by `Ks(0 − h)/length`.
    FluxOut {
        flux: f64,
        critical_head: f64,
        length: f64,
    },

    /// Imposed flux whose inflow cannot push the boundary cell above `reference_head`
    ///
    /// Inflow is limited by `Ks(reference_head − h)/length`; outflow is not limited.
    FluxIn {
        flux: f64,
        reference_head: f64,
        length: f64,
    },

    /// Prescribed head at the boundary, reached over `length` from the boundary cell
    Dirichlet { head: f64, length: f64 },

    /// Flux exchanged with the root xylem: `kr (xylem_head − h)`
    RootSystem { xylem_head: f64, kr: f64 },
}

impl WaterBc {
    /// Returns a short name of the kind
    pub fn kind(&self) -> &'static str {
        match self {
            WaterBc::NoFlux => "no_flux",
            WaterBc::FluxOut { .. } => "flux_out",
            WaterBc::FluxIn { .. } => "flux_in",
            WaterBc::Dirichlet { .. } => "dirichlet",
            WaterBc::RootSystem { .. } => "rootsystem",
        }
    }

    /// Calculates the flux density into the domain and its derivative with respect to the
    /// head of the boundary cell
    ///
    /// Returns `(q, ∂q/∂h)`.
    pub fn flux(&self, h: f64, soil: &VanGenuchten) -> (f64, f64) {
        match *self {
            WaterBc::NoFlux => (0.0, 0.0),
            WaterBc::FluxOut {
                flux,
                critical_head,
                length,
            } => {
                if flux < 0.0 {
                    // maximal outflow
                    let k = soil.hydraulic_conductivity(h);
                    let omax = k * (h - critical_head) / length;
                    if omax <= 0.0 {
                        (0.0, 0.0)
                    } else if -flux > omax {
                        let d_omax = (soil.dk_dh(h) * (h - critical_head) + k) / length;
                        (-omax, -d_omax)
                    } else {
                        (flux, 0.0)
                    }
                } else {
                    // maximal inflow
                    limit_inflow(flux, 0.0, h, length, soil)
                }
            }
            WaterBc::FluxIn {
                flux,
                reference_head,
                length,
            } => {
                if flux > 0.0 {
                    limit_inflow(flux, reference_head, h, length, soil)
                } else {
                    (flux, 0.0)
                }
            }
            WaterBc::Dirichlet { head, length } => {
                let (k_b, k_h) = (soil.hydraulic_conductivity(head), soil.hydraulic_conductivity(h));
                let k = 0.5 * (k_b + k_h);
                let dk = 0.5 * soil.dk_dh(h);
                let q = k * (head - h) / length;
                let dq = (dk * (head - h) - k) / length;
                (q, dq)
            }
            WaterBc::RootSystem { xylem_head, kr } => (kr * (xylem_head - h), -kr),
        }
    }
}

/// Limits an inflow by the saturated conductivity acting over the head difference to `h_max`
fn limit_inflow(flux: f64, h_max: f64, h: f64, length: f64, soil: &VanGenuchten) -> (f64, f64) {
    let imax = soil.ks * (h_max - h) / length;
    if imax <= 0.0 {
        (0.0, 0.0)
    } else if flux > imax {
        (imax, -soil.ks / length)
    } else {
        (flux, 0.0)
    }
}

/// Defines the boundary conditions of the radial solute transport equation
///
/// Fluxes are mass flux densities with positive values pointing into the soil domain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SoluteBc {
    /// Zero (diffusive) flux
    NoFlux,

    /// Prescribed concentration at the boundary, reached over `length` from the boundary cell
    Concentration { value: f64, length: f64 },

    /// Prescribed mass flux density
    Flux { flux: f64 },
}

impl SoluteBc {
    /// Returns a short name of the kind
    pub fn kind(&self) -> &'static str {
        match self {
            SoluteBc::NoFlux => "no_flux",
            SoluteBc::Concentration { .. } => "concentration",
            SoluteBc::Flux { .. } => "flux",
        }
    }

    /// Calculates the diffusive mass flux density into the domain as `a + b·c`
    ///
    /// Returns `(a, b)` given the effective diffusion coefficient at the boundary cell.
    pub fn flux_coefficients(&self, diffusion: f64) -> (f64, f64) {
        match *self {
            SoluteBc::NoFlux => (0.0, 0.0),
            SoluteBc::Concentration { value, length } => {
                let g = diffusion / length;
                (g * value, -g)
            }
            SoluteBc::Flux { flux } => (flux, 0.0),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{SoluteBc, WaterBc};
    use russell_chk::{approx_eq, deriv_central5};
    use crate::material::VanGenuchten;

    #[test]
    fn kind_works() {
        assert_eq!(WaterBc::NoFlux.kind(), "no_flux");
        assert_eq!(
            WaterBc::RootSystem {
                xylem_head: -500.0,
                kr: 1e-4
            }
            .kind(),
            "rootsystem"
        );
        assert_eq!(SoluteBc::Concentration { value: 0.0, length: 0.01 }.kind(), "concentration");
    }

    #[test]
    fn flux_out_switches_to_limited_outflow() {
        let soil = VanGenuchten::sample_loam_benchmark();
        let bc = WaterBc::FluxOut {
            flux: -0.1,
            critical_head: -15000.0,
            length: 0.0058,
        };
        // wet soil: the requested flux can be delivered
        assert_eq!(bc.flux(-100.0, &soil), (-0.1, 0.0));
        // dry soil: outflow is limited
        let h = -14000.0;
        let (q, dq) = bc.flux(h, &soil);
        let k = soil.hydraulic_conductivity(h);
        approx_eq(q, -k * 1000.0 / 0.0058, 1e-15);
        assert!(q > -0.1);
        let num = deriv_central5(h, &mut (), |x, _| bc.flux(x, &soil).0);
        approx_eq(dq, num, 1e-6 * f64::abs(num));
        // beyond the critical head nothing flows
        assert_eq!(bc.flux(-16000.0, &soil), (0.0, 0.0));
    }

    #[test]
    fn inflow_is_limited() {
        let soil = VanGenuchten::sample_loam();
        let bc = WaterBc::FluxIn {
            flux: 1e6,
            reference_head: 0.0,
            length: 0.5,
        };
        assert_eq!(bc.flux(-1.0, &soil), (100.0, -100.0));
        assert_eq!(bc.flux(1.0, &soil), (0.0, 0.0));
        let bc = WaterBc::FluxIn {
            flux: -3.0,
            reference_head: 0.0,
            length: 0.5,
        };
        assert_eq!(bc.flux(-1e4, &soil), (-3.0, 0.0));
    }

    #[test]
    fn dirichlet_and_rootsystem_work() {
        let soil = VanGenuchten::sample_loam();
        let bc = WaterBc::Dirichlet {
            head: -100.0,
            length: 0.1,
        };
        assert_eq!(bc.flux(-100.0, &soil).0, 0.0);
        assert!(bc.flux(-200.0, &soil).0 > 0.0);
        assert!(bc.flux(-50.0, &soil).0 < 0.0);
        let h = -300.0;
        let num = deriv_central5(h, &mut (), |x, _| bc.flux(x, &soil).0);
        approx_eq(bc.flux(h, &soil).1, num, 1e-6 * f64::abs(num));

        let bc = WaterBc::RootSystem {
            xylem_head: -1000.0,
            kr: 2e-4,
        };
        let (q, dq) = bc.flux(-200.0, &soil);
        approx_eq(q, -0.16, 1e-15);
        assert_eq!(dq, -2e-4);
    }

    #[test]
    fn solute_coefficients_work() {
        assert_eq!(SoluteBc::NoFlux.flux_coefficients(1.0), (0.0, 0.0));
        assert_eq!(SoluteBc::Flux { flux: 2.0 }.flux_coefficients(1.0), (2.0, 0.0));
        let (a, b) = SoluteBc::Concentration { value: 3.0, length: 0.5 }.flux_coefficients(0.1);
        approx_eq(a, 0.6, 1e-15);
        approx_eq(b, -0.2, 1e-15);
    }
}
