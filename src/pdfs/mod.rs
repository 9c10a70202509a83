use dyn_clone::DynClone;
use rand::{Rng, RngCore};

use crate::{
    resources::{Parameters, Resources},
    PeakfitResult,
};

/// A truncated Chebyshev series background.
pub mod chebyshev;
/// The Gaussian peak shape.
pub mod gaussian;

const MAX_TRIALS: usize = 1_000_000;

/// This is the only required trait for writing new shapes for this crate. Implementors describe
/// an unnormalized density of a single observable. Normalization is handled by the
/// [`AddPdf`](crate::model::AddPdf) which owns the shape, using the analytic
/// [`integral`](Pdf::integral) over whatever range the density is currently used in.
///
/// The [`register`](Pdf::register) method is called exactly once, when the shape is added to a
/// model, and should be used to tell the [`Resources`] registry about every parameter the shape
/// depends on. [`Pdf`]-implementors are required to implement [`Clone`].
///
/// See [`Gaussian`](gaussian::Gaussian) and [`Chebyshev`](chebyshev::Chebyshev) for examples.
pub trait Pdf: DynClone + Send + Sync {
    /// The unique name of this shape within a model.
    fn name(&self) -> &str;
    /// Register all free parameters and constants used by this [`Pdf`].
    fn register(&mut self, resources: &mut Resources) -> PeakfitResult<()>;
    /// The unnormalized density at `x`.
    fn evaluate(&self, parameters: &Parameters, x: f64) -> f64;
    /// The integral of [`Pdf::evaluate`] over `[lo, hi]`.
    fn integral(&self, parameters: &Parameters, lo: f64, hi: f64) -> f64;
    /// An upper bound of [`Pdf::evaluate`] on `[lo, hi]`, used for accept/reject sampling.
    fn max_value(&self, parameters: &Parameters, lo: f64, hi: f64) -> f64;
    /// Draw a single value from the shape truncated to `[lo, hi]`.
    ///
    /// The default implementation uses accept/reject sampling against
    /// [`max_value`](Pdf::max_value).
    fn sample(&self, parameters: &Parameters, lo: f64, hi: f64, rng: &mut dyn RngCore) -> f64 {
        accept_reject(self, parameters, lo, hi, rng)
    }
}

dyn_clone::clone_trait_object!(Pdf);

/// Uniform proposals on `[lo, hi]`, accepted with probability `f(x) / max`.
///
/// If the bound is unusable or nothing is accepted after a large number of trials, the last
/// uniform proposal is returned.
pub fn accept_reject<P: Pdf + ?Sized>(
    pdf: &P,
    parameters: &Parameters,
    lo: f64,
    hi: f64,
    rng: &mut dyn RngCore,
) -> f64 {
    let bound = pdf.max_value(parameters, lo, hi);
    let mut x = lo + (hi - lo) * rng.gen::<f64>();
    if !(bound.is_finite() && bound > 0.0) {
        tracing::warn!(pdf = pdf.name(), bound, "unusable density bound, sampling uniformly");
        return x;
    }
    for _ in 0..MAX_TRIALS {
        if bound * rng.gen::<f64>() <= pdf.evaluate(parameters, x) {
            return x;
        }
        x = lo + (hi - lo) * rng.gen::<f64>();
    }
    tracing::warn!(pdf = pdf.name(), "accept/reject sampling did not converge");
    x
}
