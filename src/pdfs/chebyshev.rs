use crate::{
    data::Observable,
    pdfs::Pdf,
    resources::{ParameterID, ParameterLike, Parameters, Resources},
    utils::functions::{chebyshev_t, chebyshev_t_antiderivative},
    PeakfitResult,
};

/// A background shape built from a truncated Chebyshev series,
/// ```math
/// C(x; a_0, \ldots, a_{k-1}) = 1 + \sum_{i=0}^{k-1} a_i T_{i+1}(x')
/// ```
/// where $`x' \in [-1, 1]`$ is the observable mapped linearly from its full range. The constant
/// term is fixed to one since the overall scale is absorbed by the normalization.
///
/// The series may become negative for large coefficients; such values are clamped by the
/// likelihood but should be avoided through the coefficient bounds.
#[derive(Clone)]
pub struct Chebyshev {
    name: String,
    coefficients: Vec<ParameterLike>,
    pids: Vec<ParameterID>,
    center: f64,
    half_width: f64,
}

impl Chebyshev {
    /// Construct a [`Chebyshev`] series over the range of `observable` with one coefficient per
    /// order, starting at first order.
    pub fn new(name: &str, observable: &Observable, coefficients: Vec<ParameterLike>) -> Box<Self> {
        Self {
            name: name.to_string(),
            pids: vec![ParameterID::default(); coefficients.len()],
            coefficients,
            center: 0.5 * (observable.min() + observable.max()),
            half_width: 0.5 * observable.width(),
        }
        .into()
    }

    /// The number of coefficients (the order of the series).
    pub fn order(&self) -> usize {
        self.coefficients.len()
    }

    fn to_unit(&self, x: f64) -> f64 {
        (x - self.center) / self.half_width
    }

    fn antiderivative(&self, parameters: &Parameters, u: f64) -> f64 {
        self.pids
            .iter()
            .enumerate()
            .fold(u, |acc, (i, &pid)| {
                acc + parameters.get(pid) * chebyshev_t_antiderivative(i + 1, u)
            })
    }
}

impl Pdf for Chebyshev {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, resources: &mut Resources) -> PeakfitResult<()> {
        self.pids = self
            .coefficients
            .iter()
            .map(|coefficient| resources.register_parameter(coefficient))
            .collect::<PeakfitResult<Vec<_>>>()?;
        Ok(())
    }

    fn evaluate(&self, parameters: &Parameters, x: f64) -> f64 {
        let u = self.to_unit(x);
        self.pids
            .iter()
            .enumerate()
            .fold(1.0, |acc, (i, &pid)| {
                acc + parameters.get(pid) * chebyshev_t(i + 1, u)
            })
    }

    fn integral(&self, parameters: &Parameters, lo: f64, hi: f64) -> f64 {
        self.half_width
            * (self.antiderivative(parameters, self.to_unit(hi))
                - self.antiderivative(parameters, self.to_unit(lo)))
    }

    fn max_value(&self, parameters: &Parameters, _lo: f64, _hi: f64) -> f64 {
        // |T_n(x)| <= 1 on [-1, 1]
        self.pids
            .iter()
            .fold(1.0, |acc, &pid| acc + parameters.get(pid).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{constant, parameter};
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn registered() -> (Box<Chebyshev>, Resources) {
        let energy = Observable::new("genergy", 1000.0, 2000.0).unwrap();
        let mut resources = Resources::default();
        let mut bkg = Chebyshev::new(
            "bkg",
            &energy,
            vec![
                parameter("a0", -0.3, -1.0, 1.0),
                parameter("a1", 0.1, -3.0, 3.0),
            ],
        );
        bkg.register(&mut resources).unwrap();
        (bkg, resources)
    }

    #[test]
    fn test_chebyshev_evaluation() {
        let (bkg, resources) = registered();
        assert_eq!(bkg.order(), 2);
        let values = [-0.3, 0.1];
        let parameters = Parameters::new(&values, resources.constants());
        // x' = 0: 1 + a1 * T2(0) = 1 - a1
        assert_relative_eq!(bkg.evaluate(&parameters, 1500.0), 0.9);
        // x' = 1: 1 + a0 + a1
        assert_relative_eq!(bkg.evaluate(&parameters, 2000.0), 0.8);
        // x' = -1: 1 - a0 + a1
        assert_relative_eq!(bkg.evaluate(&parameters, 1000.0), 1.4);
        assert!(bkg.max_value(&parameters, 1000.0, 2000.0) >= 1.4);
    }

    #[test]
    fn test_chebyshev_integral() {
        let (bkg, resources) = registered();
        let values = [-0.3, 0.1];
        let parameters = Parameters::new(&values, resources.constants());
        // 500 * (2 + a0 * 0 + a1 * (-2/3))
        assert_relative_eq!(
            bkg.integral(&parameters, 1000.0, 2000.0),
            500.0 * (2.0 - 0.2 / 3.0),
            epsilon = 1e-9
        );
        let (lo, hi) = (1100.0, 1725.0);
        let n = 10_000;
        let h = (hi - lo) / n as f64;
        let trapezoid: f64 = (0..n)
            .map(|i| {
                let a = lo + i as f64 * h;
                0.5 * h * (bkg.evaluate(&parameters, a) + bkg.evaluate(&parameters, a + h))
            })
            .sum();
        assert_relative_eq!(
            bkg.integral(&parameters, lo, hi),
            trapezoid,
            max_relative = 1e-8
        );
    }

    #[test]
    fn test_chebyshev_constant_coefficients() {
        let energy = Observable::new("x", -1.0, 1.0).unwrap();
        let mut resources = Resources::default();
        let mut flat = Chebyshev::new("flat", &energy, vec![constant(0.0)]);
        flat.register(&mut resources).unwrap();
        let parameters = Parameters::new(&[], resources.constants());
        assert_relative_eq!(flat.evaluate(&parameters, 0.3), 1.0);
        assert_relative_eq!(flat.integral(&parameters, -1.0, 1.0), 2.0);
    }

    #[test]
    fn test_chebyshev_sampling_follows_slope() {
        let (bkg, resources) = registered();
        let values = [-0.3, 0.1];
        let parameters = Parameters::new(&values, resources.constants());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let draws: Vec<f64> = (0..20_000)
            .map(|_| bkg.sample(&parameters, 1000.0, 2000.0, &mut rng))
            .collect();
        assert!(draws.iter().all(|x| (1000.0..=2000.0).contains(x)));
        let lower = draws.iter().filter(|&&x| x < 1500.0).count() as f64;
        let upper = draws.len() as f64 - lower;
        // the expected ratio of the two halves is about 1.4
        let expected = bkg.integral(&parameters, 1000.0, 1500.0)
            / bkg.integral(&parameters, 1500.0, 2000.0);
        assert_relative_eq!(lower / upper, expected, max_relative = 0.05);
    }
}
