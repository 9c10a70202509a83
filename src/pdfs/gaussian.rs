use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};

use crate::{
    pdfs::{accept_reject, Pdf},
    resources::{ParameterID, ParameterLike, Parameters, Resources},
    utils::functions::gaussian_integral,
    PeakfitResult,
};

/// Below this acceptance, direct normal draws are replaced by accept/reject sampling.
const MIN_ACCEPTANCE: f64 = 1e-2;

/// A Gaussian peak,
/// ```math
/// G(x; \mu, \sigma) = \exp\left(-\frac{1}{2}\left(\frac{x - \mu}{\sigma}\right)^2\right)
/// ```
/// where only the magnitude of $`\sigma`$ is used.
#[derive(Clone)]
pub struct Gaussian {
    name: String,
    mean: ParameterLike,
    sigma: ParameterLike,
    pid_mean: ParameterID,
    pid_sigma: ParameterID,
}

impl Gaussian {
    /// Construct a [`Gaussian`] with the given name, mean, and width.
    pub fn new(name: &str, mean: ParameterLike, sigma: ParameterLike) -> Box<Self> {
        Self {
            name: name.to_string(),
            mean,
            sigma,
            pid_mean: ParameterID::default(),
            pid_sigma: ParameterID::default(),
        }
        .into()
    }

    fn mean_sigma(&self, parameters: &Parameters) -> (f64, f64) {
        (
            parameters.get(self.pid_mean),
            parameters.get(self.pid_sigma).abs(),
        )
    }
}

impl Pdf for Gaussian {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, resources: &mut Resources) -> PeakfitResult<()> {
        self.pid_mean = resources.register_parameter(&self.mean)?;
        self.pid_sigma = resources.register_parameter(&self.sigma)?;
        Ok(())
    }

    fn evaluate(&self, parameters: &Parameters, x: f64) -> f64 {
        let (mean, sigma) = self.mean_sigma(parameters);
        let z = (x - mean) / sigma;
        f64::exp(-0.5 * z * z)
    }

    fn integral(&self, parameters: &Parameters, lo: f64, hi: f64) -> f64 {
        let (mean, sigma) = self.mean_sigma(parameters);
        gaussian_integral(mean, sigma, lo, hi)
    }

    fn max_value(&self, parameters: &Parameters, lo: f64, hi: f64) -> f64 {
        let (mean, _) = self.mean_sigma(parameters);
        self.evaluate(parameters, mean.clamp(lo, hi))
    }

    fn sample(&self, parameters: &Parameters, lo: f64, hi: f64, rng: &mut dyn RngCore) -> f64 {
        let (mean, sigma) = self.mean_sigma(parameters);
        let acceptance =
            self.integral(parameters, lo, hi) / (sigma * f64::sqrt(2.0 * std::f64::consts::PI));
        match Normal::new(mean, sigma) {
            Ok(normal) if sigma > 0.0 && acceptance > MIN_ACCEPTANCE => loop {
                let x = normal.sample(rng);
                if x >= lo && x <= hi {
                    return x;
                }
            },
            _ if sigma == 0.0 && mean >= lo && mean <= hi => mean,
            _ if sigma == 0.0 => lo + (hi - lo) * rng.gen::<f64>(),
            _ => accept_reject(self, parameters, lo, hi, rng),
        }
    }
}
