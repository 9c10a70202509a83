use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

#[cfg(feature = "rayon")]
use accurate::{sum::Klein, traits::*};
use ganesh::{
    algorithms::{NelderMead, LBFGSB},
    Algorithm, Function, Minimizer,
};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "rayon")]
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};

use crate::{
    data::Dataset,
    model::AddPdf,
    resources::Parameter,
    results::{CovarianceQuality, FitParameter, FitResult},
    utils::{enums::MinimizerAlgorithm, functions::ln_clamped},
    PeakfitError, PeakfitResult,
};

/// Number of refinements of each finite-difference step in [`NLL::hessian`].
const STEP_REFINEMENTS: usize = 3;

/// An unbinned negative log-likelihood evaluator for an [`AddPdf`] and a [`Dataset`].
///
/// For an extended model with yields $`n_i`$ and $`\nu = \sum_i n_i`$,
/// ```math
/// NLL(\vec{p}) = \nu - \sum_{e \in \text{Data}} \text{weight}(e) \ln\left(\sum_i n_i \frac{f_i(x_e)}{\int f_i}\right)
/// ```
/// while for a fraction model the first term is dropped and the density is used directly. All
/// integrals are taken over the fit range, and events outside of it are ignored.
#[derive(Clone)]
pub struct NLL {
    model: Arc<AddPdf>,
    dataset: Arc<Dataset>,
    range: (f64, f64),
    n_events: f64,
    #[cfg(feature = "rayon")]
    pool: Arc<ThreadPool>,
    evaluations: Arc<AtomicUsize>,
}

impl NLL {
    /// Construct an [`NLL`] for `model` and `dataset`, restricted to `range` (the full observable
    /// range if `None`), evaluated with `threads` worker threads.
    ///
    /// # Errors
    ///
    /// Fails if the range is not inside the observable range, if `threads` is zero, if no event
    /// falls inside the range, or if the thread pool cannot be built.
    pub fn new(
        model: &AddPdf,
        dataset: &Dataset,
        range: Option<(f64, f64)>,
        threads: usize,
    ) -> PeakfitResult<Box<Self>> {
        let range = range.unwrap_or_else(|| model.observable().range());
        if !model.observable().contains_range(range) {
            return Err(PeakfitError::RangeError {
                min: range.0,
                max: range.1,
            });
        }
        if threads == 0 {
            return Err(PeakfitError::Custom(
                "At least one thread is required to evaluate a likelihood".to_string(),
            ));
        }
        let dataset = dataset.filter_range(range);
        if dataset.is_empty() {
            return Err(PeakfitError::Custom(format!(
                "No events inside the fit range [{}, {}]",
                range.0, range.1
            )));
        }
        let n_events = dataset.weighted_len();
        #[cfg(feature = "rayon")]
        let pool = Arc::new(ThreadPoolBuilder::new().num_threads(threads).build()?);
        if cfg!(not(feature = "rayon")) && threads > 1 {
            tracing::warn!(threads, "built without the rayon feature, evaluating on one thread");
        }
        tracing::debug!(
            model = model.name(),
            events = dataset.len(),
            weighted_events = n_events,
            lo = range.0,
            hi = range.1,
            threads,
            "built likelihood"
        );
        Ok(Self {
            model: Arc::new(model.clone()),
            dataset: Arc::new(dataset),
            range,
            n_events,
            #[cfg(feature = "rayon")]
            pool,
            evaluations: Arc::new(AtomicUsize::new(0)),
        }
        .into())
    }

    /// The names of the free parameters in the order expected by [`NLL::evaluate`].
    pub fn parameters(&self) -> Vec<String> {
        self.model.parameter_names()
    }

    /// The model being fit.
    pub fn model(&self) -> &AddPdf {
        &self.model
    }

    /// The events inside the fit range.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The fit range.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// The weighted number of events inside the fit range.
    pub fn n_events(&self) -> f64 {
        self.n_events
    }

    /// The number of times [`NLL::evaluate`] has been called.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// The weighted sum of the log-density over all events.
    #[cfg(feature = "rayon")]
    fn log_density_sum(&self, values: &[f64]) -> f64 {
        let weights = self.model.component_weights(values, self.range);
        let parameters = self.model.view(values);
        self.pool.install(|| {
            self.dataset
                .par_iter()
                .map(|e| {
                    e.weight * ln_clamped(self.model.weighted_sum(&parameters, &weights, e.value))
                })
                .parallel_sum_with_accumulator::<Klein<f64>>()
        })
    }

    /// The weighted sum of the log-density over all events.
    #[cfg(not(feature = "rayon"))]
    fn log_density_sum(&self, values: &[f64]) -> f64 {
        let weights = self.model.component_weights(values, self.range);
        let parameters = self.model.view(values);
        self.dataset
            .iter()
            .map(|e| e.weight * ln_clamped(self.model.weighted_sum(&parameters, &weights, e.value)))
            .sum()
    }

    /// Evaluate the negative log-likelihood at the given free parameter values.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let log_density = self.log_density_sum(values);
        let nll = match self.model.expected_events(values) {
            Some(nu) => nu - self.n_events * ln_clamped(nu) - log_density,
            None => -log_density,
        };
        tracing::trace!(nll, "evaluated likelihood");
        nll
    }

    /// The central-difference gradient using the given step for each parameter.
    pub fn gradient(&self, values: &[f64], steps: &[f64]) -> DVector<f64> {
        let mut x = values.to_vec();
        DVector::from_iterator(
            values.len(),
            (0..values.len()).map(|i| {
                x[i] = values[i] + steps[i];
                let f_plus = self.evaluate(&x);
                x[i] = values[i] - steps[i];
                let f_minus = self.evaluate(&x);
                x[i] = values[i];
                (f_plus - f_minus) / (2.0 * steps[i])
            }),
        )
    }

    /// Choose a finite-difference step for every parameter by refining an initial guess towards
    /// half of the conditional standard deviation, where the likelihood is dominated by its
    /// quadratic term rather than by rounding.
    fn hessian_steps(&self, values: &[f64], f0: f64, scales: &[f64]) -> Vec<f64> {
        let mut x = values.to_vec();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let floor = 1e-8 * v.abs().max(1.0);
                let mut h = (1e-2 * scales[i]).max(floor);
                for _ in 0..STEP_REFINEMENTS {
                    x[i] = v + h;
                    let f_plus = self.evaluate(&x);
                    x[i] = v - h;
                    let f_minus = self.evaluate(&x);
                    x[i] = v;
                    let d2 = (f_plus - 2.0 * f0 + f_minus) / (h * h);
                    if d2.is_finite() && d2 > 0.0 {
                        h = (0.5 / d2.sqrt()).clamp(floor, scales[i]);
                    } else {
                        h = (10.0 * h).min(scales[i]);
                    }
                }
                h
            })
            .collect()
    }

    /// Estimate the Hessian matrix of the negative log-likelihood at `values` with central
    /// differences, using per-parameter step sizes.
    pub fn hessian(&self, values: &[f64], steps: &[f64]) -> DMatrix<f64> {
        let n = values.len();
        let f0 = self.evaluate(values);
        let mut hessian = DMatrix::zeros(n, n);
        let mut x = values.to_vec();
        for i in 0..n {
            x[i] = values[i] + steps[i];
            let f_plus = self.evaluate(&x);
            x[i] = values[i] - steps[i];
            let f_minus = self.evaluate(&x);
            x[i] = values[i];
            hessian[(i, i)] = (f_plus - 2.0 * f0 + f_minus) / (steps[i] * steps[i]);
            for j in 0..i {
                let mut corner = |si: f64, sj: f64| {
                    x[i] = values[i] + si * steps[i];
                    x[j] = values[j] + sj * steps[j];
                    let f = self.evaluate(&x);
                    x[i] = values[i];
                    x[j] = values[j];
                    f
                };
                let h_ij = (corner(1.0, 1.0) - corner(1.0, -1.0) - corner(-1.0, 1.0)
                    + corner(-1.0, -1.0))
                    / (4.0 * steps[i] * steps[j]);
                hessian[(i, j)] = h_ij;
                hessian[(j, i)] = h_ij;
            }
        }
        hessian
    }

    /// Estimate the Hessian at the minimum in external coordinates, invert it and compute the
    /// estimated distance to minimum. Used when the minimizer did not provide a Hessian.
    fn hesse(
        &self,
        values: &[f64],
        f0: f64,
        scales: &[f64],
        converged: bool,
    ) -> (DMatrix<f64>, CovarianceQuality, f64) {
        let steps = self.hessian_steps(values, f0, scales);
        let (covariance, quality) = invert_hessian(self.hessian(values, &steps), converged);
        let gradient = self.gradient(values, &steps);
        let edm = 0.5 * (gradient.transpose() * &covariance * &gradient)[(0, 0)];
        (covariance, quality, edm)
    }
}

/// Invert a Hessian through its Cholesky decomposition, falling back to the inverse of its
/// diagonal when it is not positive definite.
fn invert_hessian(hessian: DMatrix<f64>, converged: bool) -> (DMatrix<f64>, CovarianceQuality) {
    match hessian.clone().cholesky() {
        Some(cholesky) if converged => (cholesky.inverse(), CovarianceQuality::Full),
        Some(cholesky) => (cholesky.inverse(), CovarianceQuality::Approximate),
        None => {
            tracing::warn!("Hessian is not positive definite, using its diagonal");
            let diagonal = hessian.diagonal().map(|h| {
                if h.abs() > 0.0 {
                    1.0 / h.abs()
                } else {
                    0.0
                }
            });
            (
                DMatrix::from_diagonal(&diagonal),
                CovarianceQuality::NotPositiveDefinite,
            )
        }
    }
}

impl Function<(), Infallible> for NLL {
    fn evaluate(&self, parameters: &[f64], _user_data: &mut ()) -> Result<f64, Infallible> {
        Ok(NLL::evaluate(self, parameters))
    }
}

/// A linear map between external parameter values and the coordinates seen by the minimizer.
///
/// Bounded parameters are mapped onto the unit interval; other parameters are shifted to their
/// initial value and scaled by its magnitude. This puts yields, positions and shape coefficients
/// on comparable scales.
#[derive(Clone, Debug)]
struct ParameterTransform {
    offsets: Vec<f64>,
    scales: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

impl ParameterTransform {
    fn new(parameters: &[Parameter]) -> Self {
        let (offsets, scales) = parameters
            .iter()
            .map(|p| {
                if p.is_bounded() && p.max > p.min {
                    (p.min, p.max - p.min)
                } else {
                    (p.value, p.value.abs().max(1.0))
                }
            })
            .unzip();
        Self {
            offsets,
            scales,
            bounds: parameters.iter().map(|p| p.bounds()).collect(),
        }
    }

    fn to_internal(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.offsets.iter().zip(self.scales.iter()))
            .map(|(v, (o, s))| (v - o) / s)
            .collect()
    }

    fn to_external(&self, internal: &[f64]) -> Vec<f64> {
        internal
            .iter()
            .zip(self.offsets.iter().zip(self.scales.iter()))
            .zip(self.bounds.iter())
            .map(|((u, (o, s)), (lo, hi))| (o + u * s).clamp(*lo, *hi))
            .collect()
    }

    /// Map a covariance matrix of internal coordinates to external ones. The transform is
    /// linear, so this is `S V S` with `S` the diagonal of scales.
    fn covariance_to_external(&self, covariance: &DMatrix<f64>) -> DMatrix<f64> {
        let jacobian = DMatrix::from_diagonal(&DVector::from_column_slice(&self.scales));
        &jacobian * covariance * &jacobian
    }

    fn internal_bounds(&self) -> Option<Vec<(f64, f64)>> {
        if self.bounds.iter().all(|(lo, hi)| lo.is_infinite() && hi.is_infinite()) {
            return None;
        }
        Some(self.to_internal_bounds())
    }

    fn to_internal_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds
            .iter()
            .zip(self.offsets.iter().zip(self.scales.iter()))
            .map(|((lo, hi), (o, s))| ((lo - o) / s, (hi - o) / s))
            .collect()
    }
}

/// The [`NLL`] as seen by the minimizer, in transformed coordinates.
struct Objective<'a> {
    nll: &'a NLL,
    transform: &'a ParameterTransform,
}

impl Function<(), Infallible> for Objective<'_> {
    fn evaluate(&self, x: &[f64], _user_data: &mut ()) -> Result<f64, Infallible> {
        Ok(self.nll.evaluate(&self.transform.to_external(x)))
    }
}

/// A set of options that are used when minimizations are performed.
#[derive(Clone, Debug)]
pub struct MinimizerOptions {
    algorithm: MinimizerAlgorithm,
    max_steps: usize,
    hesse: bool,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            algorithm: MinimizerAlgorithm::Lbfgsb,
            max_steps: 4000,
            hesse: true,
        }
    }
}

impl MinimizerOptions {
    /// Set the [`MinimizerAlgorithm`] to be used in the minimization (default:
    /// [`MinimizerAlgorithm::Lbfgsb`]).
    pub fn with_algorithm(self, algorithm: MinimizerAlgorithm) -> Self {
        Self { algorithm, ..self }
    }

    /// Set the maximum number of algorithm steps for the minimization (default: 4000).
    pub fn with_max_steps(self, max_steps: usize) -> Self {
        Self { max_steps, ..self }
    }

    /// Enable or disable the Hessian-based error estimate after the minimization (default:
    /// enabled). Nelder-Mead skips the Hessian entirely when disabled, while L-BFGS-B always
    /// evaluates one and it is only left out of the result.
    pub fn with_hesse(self, hesse: bool) -> Self {
        Self { hesse, ..self }
    }

    /// The selected algorithm.
    pub fn algorithm(&self) -> MinimizerAlgorithm {
        self.algorithm
    }
}

impl NLL {
    /// Minimizes the negative log-likelihood starting from the initial parameter values of the
    /// model, then estimates parameter uncertainties from the Hessian at the minimum. The
    /// minimizer's own Hessian is used when it provides one.
    pub fn minimize(&self, options: Option<MinimizerOptions>) -> PeakfitResult<FitResult> {
        let options = options.unwrap_or_default();
        let parameters: Vec<Parameter> = self.model.parameters().into_iter().cloned().collect();
        let n = parameters.len();
        let initial: Vec<f64> = parameters.iter().map(|p| p.value).collect();
        let transform = ParameterTransform::new(&parameters);
        let evaluations_before = self.evaluations();
        tracing::info!(
            model = self.model.name(),
            parameters = n,
            algorithm = %options.algorithm,
            "starting minimization"
        );

        let objective = Objective {
            nll: self,
            transform: &transform,
        };
        let (internal, converged, message, internal_hessian) = if n == 0 {
            (Vec::new(), true, "no free parameters".to_string(), None)
        } else {
            let algorithm: Box<dyn Algorithm<(), Infallible>> = match options.algorithm {
                MinimizerAlgorithm::Lbfgsb => Box::new(LBFGSB::<(), Infallible>::default()),
                MinimizerAlgorithm::NelderMead if options.hesse => Box::new(NelderMead::default()),
                MinimizerAlgorithm::NelderMead => {
                    Box::new(NelderMead::default().with_no_error_calculation())
                }
            };
            let mut m = Minimizer::new(algorithm, n)
                .with_bounds(transform.internal_bounds())
                .with_max_steps(options.max_steps);
            m.minimize(&objective, &transform.to_internal(&initial), &mut ())
                .unwrap_or_else(|never| match never {});
            (
                m.status.x.iter().copied().collect::<Vec<f64>>(),
                m.status.converged,
                m.status.message.clone(),
                m.status.hess.take(),
            )
        };
        let best = transform.to_external(&internal);
        let min_nll = self.evaluate(&best);
        tracing::info!(min_nll, converged, status = %message, "minimization finished");
        if !converged {
            tracing::warn!(status = %message, "minimizer did not report convergence");
        }

        let (covariance, covariance_quality, edm) = match internal_hessian {
            _ if !options.hesse || n == 0 => {
                (DMatrix::zeros(n, n), CovarianceQuality::NotCalculated, f64::NAN)
            }
            // the minimizer's Hessian is taken in internal coordinates
            Some(hessian) => {
                let (covariance, quality) = invert_hessian(hessian, converged);
                let gradient = Function::gradient(&objective, &internal, &mut ())
                    .unwrap_or_else(|never| match never {});
                let edm = 0.5 * (gradient.transpose() * &covariance * &gradient)[(0, 0)];
                (transform.covariance_to_external(&covariance), quality, edm)
            }
            None => self.hesse(&best, min_nll, &transform.scales, converged),
        };
        tracing::debug!(edm, quality = %covariance_quality, "computed covariance");

        let fit_parameters = parameters
            .iter()
            .zip(best.iter())
            .enumerate()
            .map(|(i, (p, &value))| FitParameter {
                name: p.name.clone(),
                title: p.title.clone(),
                initial: p.value,
                value,
                error: if covariance_quality == CovarianceQuality::NotCalculated {
                    f64::NAN
                } else {
                    covariance[(i, i)].max(0.0).sqrt()
                },
                min: p.min,
                max: p.max,
            })
            .collect();
        Ok(FitResult {
            model: self.model.name().to_string(),
            parameters: fit_parameters,
            constants: self.model.constants().to_vec(),
            min_nll,
            edm,
            covariance,
            covariance_quality,
            converged,
            status: message,
            algorithm: options.algorithm,
            n_evaluations: self.evaluations() - evaluations_before,
            n_events: self.n_events,
            range: self.range,
        })
    }
}
