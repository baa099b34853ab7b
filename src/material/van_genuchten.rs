use crate::base::{Error, H_MIN};
use serde::{Deserialize, Serialize};

/// Implements the van Genuchten–Mualem retention and conductivity model
///
/// Pressure heads are in cm (negative when unsaturated) and conductivities in cm/day.
///
/// ```text
/// Se = (1 + (α|h|)ⁿ)⁻ᵐ          m = 1 − 1/n
/// θ  = θr + (θs − θr) Se
/// K  = Ks Se^L (1 − (1 − Se^(1/m))ᵐ)²     L = 1/2
/// ```
///
/// # Reference
///
/// * van Genuchten MT (1980) A closed-form equation for predicting the hydraulic conductivity
///   of unsaturated soils. Soil Science Society of America Journal, 44(5), 892-898
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VanGenuchten {
    /// Residual water content θr
    pub theta_r: f64,

    /// Saturated water content θs
    pub theta_s: f64,

    /// α parameter (1/cm)
    pub alpha: f64,

    /// n parameter
    pub n: f64,

    /// m = 1 − 1/n
    pub m: f64,

    /// Saturated hydraulic conductivity Ks (cm/day)
    pub ks: f64,
}

/// Mualem pore-connectivity exponent
const TORTUOSITY: f64 = 0.5;

impl VanGenuchten {
    /// Allocates a new instance
    pub fn new(theta_r: f64, theta_s: f64, alpha: f64, n: f64, ks: f64) -> Result<Self, Error> {
        if theta_s <= 0.0 || theta_s > 1.0 {
            return Err(Error::InvalidParameter(
                "theta_s parameter for the van Genuchten model is invalid".to_string(),
            ));
        }
        if theta_r < 0.0 || theta_r >= theta_s {
            return Err(Error::InvalidParameter(
                "theta_r parameter for the van Genuchten model is invalid".to_string(),
            ));
        }
        if alpha <= 0.0 {
            return Err(Error::InvalidParameter(
                "alpha parameter for the van Genuchten model is invalid".to_string(),
            ));
        }
        if n <= 1.0 {
            return Err(Error::InvalidParameter(
                "n parameter for the van Genuchten model is invalid".to_string(),
            ));
        }
        if ks <= 0.0 {
            return Err(Error::InvalidParameter(
                "ks parameter for the van Genuchten model is invalid".to_string(),
            ));
        }
        Ok(VanGenuchten {
            theta_r,
            theta_s,
            alpha,
            n,
            m: 1.0 - 1.0 / n,
            ks,
        })
    }

    /// Allocates a new instance from [θr, θs, α, n, Ks]
    pub fn from_array(params: &[f64; 5]) -> Result<Self, Error> {
        VanGenuchten::new(params[0], params[1], params[2], params[3], params[4])
    }

    /// Loam used in the coupled benchmarks: [0.08, 0.43, 0.04, 1.6, 50]
    pub fn sample_loam() -> Self {
        VanGenuchten::sample(&[0.08, 0.43, 0.04, 1.6, 50.0])
    }

    /// Loam used in the cylindrical benchmarks: [0.045, 0.43, 0.04, 1.6, 50]
    pub fn sample_loam_benchmark() -> Self {
        VanGenuchten::sample(&[0.045, 0.43, 0.04, 1.6, 50.0])
    }

    /// Sand: [0.045, 0.43, 0.15, 3, 1000]
    pub fn sample_sand() -> Self {
        VanGenuchten::sample(&[0.045, 0.43, 0.15, 3.0, 1000.0])
    }

    /// Clay: [0.1, 0.4, 0.01, 1.1, 10]
    pub fn sample_clay() -> Self {
        VanGenuchten::sample(&[0.1, 0.4, 0.01, 1.1, 10.0])
    }

    /// Builds one of the sample parameter sets (known to be valid)
    fn sample(p: &[f64; 5]) -> Self {
        VanGenuchten {
            theta_r: p[0],
            theta_s: p[1],
            alpha: p[2],
            n: p[3],
            m: 1.0 - 1.0 / p[3],
            ks: p[4],
        }
    }

    /// Returns x = (α|h|)ⁿ
    #[inline]
    fn x(&self, h: f64) -> f64 {
        f64::powf(self.alpha * f64::abs(h), self.n)
    }

    /// Calculates the effective saturation Se(h)
    pub fn effective_saturation(&self, h: f64) -> f64 {
        if h >= 0.0 {
            return 1.0;
        }
        f64::powf(1.0 + self.x(h), -self.m)
    }

    /// Calculates the volumetric water content θ(h)
    pub fn water_content(&self, h: f64) -> f64 {
        self.theta_r + (self.theta_s - self.theta_r) * self.effective_saturation(h)
    }

    /// Calculates the hydraulic conductivity K(h)
    pub fn hydraulic_conductivity(&self, h: f64) -> f64 {
        if h >= 0.0 {
            return self.ks;
        }
        let x = self.x(h);
        let se = f64::powf(1.0 + x, -self.m);
        // 1 − (x/(1+x))ᵐ without cancellation
        let f = -f64::exp_m1(-self.m * f64::ln_1p(1.0 / x));
        self.ks * f64::powf(se, TORTUOSITY) * f * f
    }

    /// Calculates the specific moisture capacity C(h) = dθ/dh
    pub fn specific_moisture_capacity(&self, h: f64) -> f64 {
        if h >= 0.0 {
            return 0.0;
        }
        let x = self.x(h);
        if !x.is_finite() || x == 0.0 {
            return 0.0;
        }
        let se = f64::powf(1.0 + x, -self.m);
        -(self.theta_s - self.theta_r) * self.m * self.n * x * se / ((1.0 + x) * h)
    }

    /// Calculates dK/dh
    pub fn dk_dh(&self, h: f64) -> f64 {
        if h >= 0.0 {
            return 0.0;
        }
        let x = self.x(h);
        if !x.is_finite() || x == 0.0 {
            return 0.0;
        }
        let se = f64::powf(1.0 + x, -self.m);
        let g = f64::exp(-self.m * f64::ln_1p(1.0 / x)); // (x/(1+x))ᵐ
        let f = -f64::exp_m1(-self.m * f64::ln_1p(1.0 / x));
        let l = TORTUOSITY;
        -self.ks * f64::powf(se, l) * self.m * self.n * f * (l * f * x + 2.0 * g) / ((1.0 + x) * h)
    }

    /// Calculates the pressure head corresponding to a water content (inverse of θ(h))
    ///
    /// The result is clamped to [H_MIN, 0].
    pub fn pressure_head(&self, theta: f64) -> f64 {
        let se = (theta - self.theta_r) / (self.theta_s - self.theta_r);
        if se >= 1.0 {
            return 0.0;
        }
        if se <= 0.0 {
            return H_MIN;
        }
        let h = -f64::powf(f64::powf(se, -1.0 / self.m) - 1.0, 1.0 / self.n) / self.alpha;
        f64::max(h, H_MIN)
    }

    /// Calculates θ for a slice of heads
    pub fn water_contents(&self, heads: &[f64]) -> Vec<f64> {
        heads.iter().map(|h| self.water_content(*h)).collect()
    }

    /// Calculates K for a slice of heads
    pub fn hydraulic_conductivities(&self, heads: &[f64]) -> Vec<f64> {
        heads.iter().map(|h| self.hydraulic_conductivity(*h)).collect()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::VanGenuchten;
    use crate::base::{Error, H_MIN};
    use russell_chk::{approx_eq, deriv_central5};

    #[test]
    fn new_captures_errors() {
        assert_eq!(
            VanGenuchten::new(0.1, 1.2, 0.04, 1.6, 50.0).err(),
            Some(Error::InvalidParameter(
                "theta_s parameter for the van Genuchten model is invalid".to_string()
            ))
        );
        assert!(VanGenuchten::new(0.5, 0.43, 0.04, 1.6, 50.0).is_err());
        assert!(VanGenuchten::new(0.08, 0.43, 0.0, 1.6, 50.0).is_err());
        assert!(VanGenuchten::new(0.08, 0.43, 0.04, 1.0, 50.0).is_err());
        assert!(VanGenuchten::new(0.08, 0.43, 0.04, 1.6, 0.0).is_err());
    }

    #[test]
    fn saturated_branch_works() {
        let soil = VanGenuchten::sample_loam();
        assert_eq!(soil.water_content(0.0), 0.43);
        assert_eq!(soil.water_content(10.0), 0.43);
        assert_eq!(soil.hydraulic_conductivity(0.0), 50.0);
        assert_eq!(soil.hydraulic_conductivity(5.0), 50.0);
        assert_eq!(soil.specific_moisture_capacity(1.0), 0.0);
        assert_eq!(soil.dk_dh(1.0), 0.0);
    }

    #[test]
    fn unsaturated_branch_works() {
        let soil = VanGenuchten::sample_loam_benchmark();
        // x = (0.04·100)^1.6; Se = (1+x)^-0.375
        let x = f64::powf(4.0, 1.6);
        let se = f64::powf(1.0 + x, -0.375);
        approx_eq(soil.water_content(-100.0), 0.045 + 0.385 * se, 1e-15);
        let f = 1.0 - f64::powf(1.0 - f64::powf(se, 1.0 / 0.375), 0.375);
        approx_eq(soil.hydraulic_conductivity(-100.0), 50.0 * f64::sqrt(se) * f * f, 1e-12);
        assert!(soil.hydraulic_conductivity(-100.0) < soil.hydraulic_conductivity(-10.0));
    }

    #[test]
    fn extreme_heads_do_not_produce_nan() {
        let soil = VanGenuchten::sample_clay();
        for h in [-1e6, -1e12, -1e200, -1e308, f64::MIN] {
            let theta = soil.water_content(h);
            let k = soil.hydraulic_conductivity(h);
            let c = soil.specific_moisture_capacity(h);
            let dk = soil.dk_dh(h);
            assert!(theta.is_finite() && theta >= soil.theta_r);
            assert!(k.is_finite() && k >= 0.0);
            assert!(c.is_finite() && c >= 0.0);
            assert!(dk.is_finite());
        }
        assert_eq!(soil.water_content(f64::MIN), soil.theta_r);
        assert_eq!(soil.hydraulic_conductivity(f64::MIN), 0.0);
    }

    #[test]
    fn derivatives_match_numerical_ones() {
        for soil in [
            VanGenuchten::sample_loam(),
            VanGenuchten::sample_sand(),
            VanGenuchten::sample_clay(),
        ] {
            for h in [-5.0, -50.0, -500.0, -5000.0] {
                let num = deriv_central5(h, &mut (), |x, _| soil.water_content(x));
                let ana = soil.specific_moisture_capacity(h);
                approx_eq(ana, num, 1e-6 * f64::max(1.0, f64::abs(num)));
                let num = deriv_central5(h, &mut (), |x, _| soil.hydraulic_conductivity(x));
                let ana = soil.dk_dh(h);
                approx_eq(ana, num, 1e-5 * f64::max(1e-6, f64::abs(num)));
            }
        }
    }

    #[test]
    fn pressure_head_inverts_water_content() {
        let soil = VanGenuchten::sample_loam();
        for h in [-1.0, -100.0, -659.8, -15000.0] {
            let theta = soil.water_content(h);
            approx_eq(soil.pressure_head(theta), h, 1e-8 * f64::abs(h));
        }
        assert_eq!(soil.pressure_head(0.43), 0.0);
        assert_eq!(soil.pressure_head(0.5), 0.0);
        assert_eq!(soil.pressure_head(0.08), H_MIN);
        assert_eq!(soil.pressure_head(0.0), H_MIN);
    }

    #[test]
    fn vectorized_forms_work() {
        let soil = VanGenuchten::sample_loam();
        let heads = [-100.0, 0.0];
        let thetas = soil.water_contents(&heads);
        let ks = soil.hydraulic_conductivities(&heads);
        assert_eq!(thetas[0], soil.water_content(-100.0));
        assert_eq!(thetas[1], 0.43);
        assert_eq!(ks[1], 50.0);
    }
}
