use std::collections::HashSet;

use rand::{distributions::WeightedIndex, prelude::Distribution, RngCore};
use rand_distr::Poisson;

use crate::{
    data::{Dataset, Event, Observable},
    pdfs::Pdf,
    resources::{Parameter, ParameterID, ParameterLike, Parameters, Resources},
    PeakfitError, PeakfitResult,
};

/// How the coefficients of an [`AddPdf`] are interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Coefficients {
    /// One yield (expected number of events) per component; the model is extended.
    Yields,
    /// One fraction per component except the last, which receives `1 - Σf`.
    Fractions,
}

/// A weighted sum of [`Pdf`]s,
/// ```math
/// P(x) = \frac{1}{\sum_i c_i} \sum_i c_i \frac{f_i(x)}{\int f_i}
/// ```
/// where the coefficients $`c_i`$ are either yields (an extended model) or fractions.
///
/// All component shapes and coefficients are registered with a single [`Resources`] registry when
/// the model is built, so the free parameters of the model are known up front and appear in
/// registration order (shapes first, then coefficients).
#[derive(Clone)]
pub struct AddPdf {
    name: String,
    observable: Observable,
    components: Vec<Box<dyn Pdf>>,
    coefficients: Vec<ParameterLike>,
    coefficient_ids: Vec<ParameterID>,
    kind: Coefficients,
    resources: Resources,
}

impl AddPdf {
    /// Build a sum of `pdfs` with the given coefficients.
    ///
    /// Passing as many coefficients as shapes creates an extended model whose coefficients are
    /// yields. Passing one fewer creates a fraction model.
    ///
    /// # Errors
    ///
    /// Returns [`PeakfitError::CoefficientCountError`] for any other number of coefficients (or
    /// no shapes), [`PeakfitError::RegistrationError`] if two shapes share a name or a parameter
    /// is declared twice with different definitions, and [`PeakfitError::BoundsError`] for
    /// invalid parameter bounds.
    pub fn new(
        name: &str,
        observable: &Observable,
        pdfs: Vec<Box<dyn Pdf>>,
        coefficients: Vec<ParameterLike>,
    ) -> PeakfitResult<Self> {
        let kind = match (pdfs.len(), coefficients.len()) {
            (0, _) => None,
            (n, m) if n == m => Some(Coefficients::Yields),
            (n, m) if n == m + 1 => Some(Coefficients::Fractions),
            _ => None,
        }
        .ok_or(PeakfitError::CoefficientCountError {
            pdfs: pdfs.len(),
            coefficients: coefficients.len(),
        })?;
        let mut names = HashSet::new();
        for pdf in &pdfs {
            if !names.insert(pdf.name().to_string()) {
                return Err(PeakfitError::RegistrationError {
                    name: pdf.name().to_string(),
                });
            }
        }
        let mut resources = Resources::default();
        let mut components = pdfs;
        for pdf in components.iter_mut() {
            pdf.register(&mut resources)?;
        }
        let coefficient_ids = coefficients
            .iter()
            .map(|c| resources.register_parameter(c))
            .collect::<PeakfitResult<Vec<_>>>()?;
        tracing::debug!(
            model = name,
            components = components.len(),
            parameters = resources.n_free(),
            kind = ?kind,
            "registered model"
        );
        Ok(Self {
            name: name.to_string(),
            observable: observable.clone(),
            components,
            coefficients,
            coefficient_ids,
            kind,
            resources,
        })
    }

    /// The name of the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The observable the model describes.
    pub fn observable(&self) -> &Observable {
        &self.observable
    }

    /// Returns `true` if the coefficients are yields.
    pub fn is_extended(&self) -> bool {
        self.kind == Coefficients::Yields
    }

    /// How the coefficients are interpreted.
    pub fn coefficient_kind(&self) -> Coefficients {
        self.kind
    }

    /// The number of component shapes.
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// The names of the component shapes.
    pub fn component_names(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|pdf| pdf.name().to_string())
            .collect()
    }

    /// The free parameters in the order expected by every evaluation method.
    pub fn parameters(&self) -> Vec<&Parameter> {
        self.resources.free_parameters()
    }

    /// The names of the free parameters.
    pub fn parameter_names(&self) -> Vec<String> {
        self.resources.parameter_names()
    }

    /// The index of a free parameter by name.
    pub fn parameter_index(&self, name: &str) -> PeakfitResult<usize> {
        self.resources.parameter_index(name)
    }

    /// The initial value of every free parameter.
    pub fn initial_values(&self) -> Vec<f64> {
        self.parameters().iter().map(|p| p.value).collect()
    }

    /// The bounds of every free parameter.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.parameters().iter().map(|p| p.bounds()).collect()
    }

    /// The constant values used by the model.
    pub fn constants(&self) -> &[f64] {
        self.resources.constants()
    }

    /// A [`Parameters`] view of the given free values and the model constants.
    pub(crate) fn view<'a>(&'a self, values: &'a [f64]) -> Parameters<'a> {
        Parameters::new(values, self.resources.constants())
    }

    /// The coefficient of every component: the yields of an extended model, or the fractions
    /// (completed by `1 - Σf`) otherwise.
    pub fn coefficients(&self, values: &[f64]) -> Vec<f64> {
        let parameters = self.view(values);
        let mut coefficients: Vec<f64> = self
            .coefficient_ids
            .iter()
            .map(|&pid| parameters.get(pid))
            .collect();
        if self.kind == Coefficients::Fractions {
            let rest = 1.0 - coefficients.iter().sum::<f64>();
            coefficients.push(rest);
        }
        coefficients
    }

    /// The total expected number of events of an extended model.
    pub fn expected_events(&self, values: &[f64]) -> Option<f64> {
        self.is_extended()
            .then(|| self.coefficients(values).iter().sum())
    }

    /// The factors $`c_i / (\int_{range} f_i \cdot \sum_j c_j)`$ which turn the unnormalized
    /// component densities into the normalized density over `range`.
    pub fn component_weights(&self, values: &[f64], range: (f64, f64)) -> Vec<f64> {
        let parameters = self.view(values);
        let coefficients = self.coefficients(values);
        let total: f64 = coefficients.iter().sum();
        self.components
            .iter()
            .zip(coefficients.iter())
            .map(|(pdf, c)| c / (pdf.integral(&parameters, range.0, range.1) * total))
            .collect()
    }

    /// Sum the weighted components at `x`, given precomputed [`AddPdf::component_weights`].
    pub(crate) fn weighted_sum(&self, parameters: &Parameters, weights: &[f64], x: f64) -> f64 {
        self.components
            .iter()
            .zip(weights.iter())
            .map(|(pdf, w)| w * pdf.evaluate(parameters, x))
            .sum()
    }

    /// The density of the model normalized over `range`.
    pub fn density(&self, values: &[f64], x: f64, range: (f64, f64)) -> f64 {
        let weights = self.component_weights(values, range);
        self.weighted_sum(&self.view(values), &weights, x)
    }

    /// The contribution of the selected components to [`AddPdf::density`].
    pub fn component_density(
        &self,
        values: &[f64],
        selection: &[usize],
        x: f64,
        range: (f64, f64),
    ) -> f64 {
        let parameters = self.view(values);
        let weights = self.component_weights(values, range);
        selection
            .iter()
            .map(|&i| weights[i] * self.components[i].evaluate(&parameters, x))
            .sum()
    }

    /// Resolve a comma-separated list of component names and/or coefficient names (for
    /// instance `"peak_1,nsig1"`) into component indices.
    ///
    /// # Errors
    ///
    /// Returns [`PeakfitError::PdfNotFoundError`] for any name which matches neither a component
    /// nor a coefficient.
    pub fn select(&self, spec: &str) -> PeakfitResult<Vec<usize>> {
        let mut selection = Vec::new();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let index = self
                .components
                .iter()
                .position(|pdf| pdf.name() == token)
                .or_else(|| {
                    self.coefficients
                        .iter()
                        .position(|c| c.name() == Some(token))
                })
                .ok_or_else(|| PeakfitError::PdfNotFoundError {
                    name: token.to_string(),
                })?;
            if !selection.contains(&index) {
                selection.push(index);
            }
        }
        if selection.is_empty() {
            return Err(PeakfitError::PdfNotFoundError {
                name: spec.to_string(),
            });
        }
        Ok(selection)
    }

    /// Generate exactly `n_events` unit-weight events over the observable range. The component
    /// of each event is drawn with probability proportional to its coefficient.
    pub fn generate(
        &self,
        values: &[f64],
        n_events: usize,
        rng: &mut dyn RngCore,
    ) -> PeakfitResult<Dataset> {
        let coefficients = self.coefficients(values);
        let chooser = WeightedIndex::new(coefficients.iter().map(|c| c.max(0.0)))
            .map_err(|e| PeakfitError::Custom(format!("Cannot generate from {}: {e}", self.name)))?;
        let parameters = self.view(values);
        let (lo, hi) = self.observable.range();
        let events = (0..n_events)
            .map(|_| {
                let component = chooser.sample(rng);
                Event::new(self.components[component].sample(&parameters, lo, hi, rng))
            })
            .collect();
        tracing::debug!(model = %self.name, n_events, "generated dataset");
        Ok(Dataset::new(events))
    }

    /// Generate a Poisson-fluctuated number of events around the expected total of an extended
    /// model.
    ///
    /// # Errors
    ///
    /// Fails for fraction models, which have no expected number of events.
    pub fn generate_extended(&self, values: &[f64], rng: &mut dyn RngCore) -> PeakfitResult<Dataset> {
        let expected = self.expected_events(values).ok_or_else(|| {
            PeakfitError::Custom(format!(
                "Model \"{}\" is not extended and has no expected number of events",
                self.name
            ))
        })?;
        let poisson = Poisson::new(expected).map_err(|e| {
            PeakfitError::Custom(format!("Invalid expected number of events {expected}: {e}"))
        })?;
        let n_events: f64 = poisson.sample(rng);
        self.generate(values, n_events as usize, rng)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        pdfs::{chebyshev::Chebyshev, gaussian::Gaussian},
        resources::{constant, parameter},
    };
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    pub(crate) fn one_peak_model(n_signal: f64, n_background: f64) -> AddPdf {
        let energy = Observable::new("genergy", 1000.0, 2000.0).unwrap();
        let peak = Gaussian::new(
            "peak",
            parameter("mean", 1350.0, 1300.0, 1400.0),
            parameter("width", 10.0, 0.0, 20.0),
        );
        let bkg = Chebyshev::new("bkg", &energy, vec![parameter("a0", -0.3, -1.0, 1.0)]);
        AddPdf::new(
            "model",
            &energy,
            vec![peak, bkg],
            vec![
                parameter("nsig", n_signal, 0.0, 100000.0),
                parameter("nbkg", n_background, 0.0, 100000.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_coefficient_counts() {
        let energy = Observable::new("genergy", 1000.0, 2000.0).unwrap();
        let make = |n: usize| -> Vec<Box<dyn Pdf>> {
            (0..n)
                .map(|i| {
                    Gaussian::new(&format!("g{i}"), constant(1500.0), constant(10.0))
                        as Box<dyn Pdf>
                })
                .collect()
        };
        let extended = AddPdf::new("m", &energy, make(2), vec![constant(1.0), constant(2.0)]);
        assert!(extended.unwrap().is_extended());
        let fractions = AddPdf::new("m", &energy, make(2), vec![constant(0.3)]).unwrap();
        assert_eq!(fractions.coefficient_kind(), Coefficients::Fractions);
        assert_eq!(fractions.coefficients(&[]), vec![0.3, 0.7]);
        assert_eq!(fractions.expected_events(&[]), None);
        assert!(matches!(
            AddPdf::new("m", &energy, make(3), vec![constant(1.0)]),
            Err(PeakfitError::CoefficientCountError { pdfs: 3, coefficients: 1 })
        ));
        assert!(matches!(
            AddPdf::new("m", &energy, Vec::new(), Vec::new()),
            Err(PeakfitError::CoefficientCountError { .. })
        ));
    }

    #[test]
    fn test_duplicate_component_names() {
        let energy = Observable::new("genergy", 1000.0, 2000.0).unwrap();
        let result = AddPdf::new(
            "m",
            &energy,
            vec![
                Gaussian::new("g", constant(1500.0), constant(10.0)),
                Gaussian::new("g", constant(1600.0), constant(10.0)),
            ],
            vec![constant(1.0), constant(1.0)],
        );
        assert!(matches!(result, Err(PeakfitError::RegistrationError { .. })));
    }

    #[test]
    fn test_parameter_order_and_sharing() {
        let energy = Observable::new("genergy", 1000.0, 2000.0).unwrap();
        let shared_width = parameter("width", 10.0, 0.0, 20.0);
        let model = AddPdf::new(
            "m",
            &energy,
            vec![
                Gaussian::new("g1", parameter("m1", 1300.0, 1200.0, 1400.0), shared_width.clone()),
                Gaussian::new("g2", parameter("m2", 1700.0, 1600.0, 1800.0), shared_width),
            ],
            vec![parameter("f1", 0.5, 0.0, 1.0)],
        )
        .unwrap();
        assert_eq!(model.parameter_names(), vec!["m1", "width", "m2", "f1"]);
        assert_eq!(model.initial_values(), vec![1300.0, 10.0, 1700.0, 0.5]);
        assert_eq!(model.bounds()[3], (0.0, 1.0));
        assert_eq!(model.parameter_index("m2").unwrap(), 2);
    }

    #[test]
    fn test_density_is_normalized() {
        let model = one_peak_model(1000.0, 5000.0);
        let values = model.initial_values();
        for range in [(1000.0, 2000.0), (1200.0, 1600.0)] {
            let n = 40_000;
            let h = (range.1 - range.0) / n as f64;
            let integral: f64 = (0..n)
                .map(|i| {
                    let a = range.0 + i as f64 * h;
                    0.5 * h * (model.density(&values, a, range) + model.density(&values, a + h, range))
                })
                .sum();
            assert_relative_eq!(integral, 1.0, max_relative = 1e-6);
        }
        assert_eq!(model.expected_events(&values), Some(6000.0));
    }

    #[test]
    fn test_component_density_sums_to_total() {
        let model = one_peak_model(1000.0, 5000.0);
        let values = model.initial_values();
        let range = model.observable().range();
        for x in [1010.0, 1345.0, 1500.0, 1999.0] {
            let total = model.density(&values, x, range);
            let parts = model.component_density(&values, &[0], x, range)
                + model.component_density(&values, &[1], x, range);
            assert_relative_eq!(total, parts, max_relative = 1e-12);
            assert_relative_eq!(
                model.component_density(&values, &[0, 1], x, range),
                total,
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_select() {
        let model = one_peak_model(1000.0, 5000.0);
        assert_eq!(model.select("peak").unwrap(), vec![0]);
        assert_eq!(model.select("peak,nsig").unwrap(), vec![0]);
        assert_eq!(model.select("bkg, nbkg").unwrap(), vec![1]);
        assert_eq!(model.select("nbkg,peak").unwrap(), vec![1, 0]);
        assert!(matches!(
            model.select("peak,other"),
            Err(PeakfitError::PdfNotFoundError { .. })
        ));
        assert!(model.select(" , ").is_err());
    }

    #[test]
    fn test_generate() {
        let model = one_peak_model(2000.0, 8000.0);
        let values = model.initial_values();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let dataset = model.generate(&values, 10_000, &mut rng).unwrap();
        assert_eq!(dataset.len(), 10_000);
        assert!(dataset.iter().all(|e| model.observable().contains(e.value)));
        // about 2000 signal events within 3 sigma plus roughly 500 background events
        let in_peak = dataset
            .iter()
            .filter(|e| (e.value - 1350.0).abs() < 30.0)
            .count() as f64;
        let background_density =
            model.component_density(&values, &[1], 1350.0, (1000.0, 2000.0));
        let expected = 2000.0 * 0.9973 + 10_000.0 * background_density * 60.0;
        assert_relative_eq!(in_peak, expected, max_relative = 0.08);
    }

    #[test]
    fn test_generate_extended() {
        let model = one_peak_model(2000.0, 8000.0);
        let values = model.initial_values();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let dataset = model.generate_extended(&values, &mut rng).unwrap();
        // 5 sigma of a Poisson with mean 10000
        assert!((dataset.len() as f64 - 10_000.0).abs() < 500.0);

        let energy = Observable::new("genergy", 1000.0, 2000.0).unwrap();
        let fractions = AddPdf::new(
            "m",
            &energy,
            vec![
                Gaussian::new("g1", constant(1300.0), constant(10.0)),
                Gaussian::new("g2", constant(1700.0), constant(10.0)),
            ],
            vec![constant(0.5)],
        )
        .unwrap();
        assert!(fractions.generate_extended(&[], &mut rng).is_err());
    }
}
