//! # peakfit
//!
//! Extended maximum-likelihood fits of one-dimensional spectra, built for the common
//! "a few peaks on top of a smooth background" problem.
//!
//! A fit is assembled from a handful of pieces:
//!
//! - an [`Observable`](crate::data::Observable) with a fixed range,
//! - bounded free [`Parameter`](crate::resources::Parameter)s,
//! - [`Pdf`](crate::pdfs::Pdf) shapes such as [`Gaussian`](crate::pdfs::gaussian::Gaussian) and
//!   [`Chebyshev`](crate::pdfs::chebyshev::Chebyshev),
//! - an [`AddPdf`](crate::model::AddPdf) which sums the shapes with yields or fractions,
//! - a negative log-likelihood ([`NLL`](crate::likelihoods::NLL)) which is minimized with
//!   [`ganesh`] and turned into a [`FitResult`](crate::results::FitResult).
//!
//! ```ignore
//! use peakfit::prelude::*;
//!
//! let energy = Observable::new("genergy", 1000.0, 2000.0)?;
//! let peak = Gaussian::new(
//!     "peak",
//!     parameter("mean", 1350.0, 1300.0, 1400.0),
//!     parameter("width", 10.0, 0.0, 20.0),
//! );
//! let bkg = Chebyshev::new("bkg", &energy, vec![parameter("a0", -0.3, -1.0, 1.0)]);
//! let model = AddPdf::new(
//!     "model",
//!     &energy,
//!     vec![peak, bkg],
//!     vec![
//!         parameter("nsig", 1000.0, 0.0, 10000.0),
//!         parameter("nbkg", 5000.0, 0.0, 10000.0),
//!     ],
//! )?;
//! ```
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Sample configuration, loaded from YAML files.
pub mod config;
/// Observables, events, [`Dataset`](crate::data::Dataset)s and histograms.
pub mod data;
/// The negative log-likelihood and the minimization machinery.
pub mod likelihoods;
/// Structured logging setup.
pub mod logging;
/// Composite models built from several [`Pdf`](crate::pdfs::Pdf)s.
pub mod model;
/// Probability density functions.
pub mod pdfs;
/// Plot frames and vector output.
pub mod plot;
/// Structures for registering and looking up free parameters.
pub mod resources;
/// The result of a fit.
pub mod results;
/// The three-peak sample program.
pub mod sample;
/// Utility enums and numerical helpers.
pub mod utils;

/// Everything needed to build and fit a model.
pub mod prelude {
    pub use crate::data::{Dataset, Event, Histogram, Observable};
    pub use crate::likelihoods::{MinimizerOptions, NLL};
    pub use crate::model::AddPdf;
    pub use crate::pdfs::{chebyshev::Chebyshev, gaussian::Gaussian, Pdf};
    pub use crate::plot::PlotFrame;
    pub use crate::resources::{constant, parameter, Parameter, ParameterLike};
    pub use crate::results::{CovarianceQuality, FitResult};
    pub use crate::utils::enums::{LineStyle, MinimizerAlgorithm, PlotColor};
    pub use crate::{PeakfitError, PeakfitResult};
}

pub type PeakfitResult<T> = Result<T, PeakfitError>;

/// The error type used by all `peakfit` methods
#[derive(Error, Debug)]
pub enum PeakfitError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An alias for [`serde_yaml::Error`].
    #[error("YAML Error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// An error type for [`rayon`] thread pools
    #[cfg(feature = "rayon")]
    #[error("Error building thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// An error raised while drawing a plot.
    #[error("Plotting error: {0}")]
    PlotError(String),
    /// An error which occurs when two different definitions are registered under the same name.
    #[error("Something by the name \"{name}\" is already registered with a different definition!")]
    RegistrationError {
        /// Name which is already registered
        name: String,
    },
    /// An error which occurs when a component lookup fails.
    #[error("No component or coefficient with name \"{name}\"!")]
    PdfNotFoundError {
        /// Name which failed lookup
        name: String,
    },
    /// An error which occurs when a parameter lookup fails.
    #[error("No free parameter with name \"{name}\"!")]
    ParameterNotFoundError {
        /// Name which failed lookup
        name: String,
    },
    /// A parameter was declared with an initial value outside of its bounds (or with inverted
    /// bounds).
    #[error("Parameter \"{name}\" has value {value} outside of its bounds [{min}, {max}]!")]
    BoundsError {
        /// Parameter name
        name: String,
        /// Offending value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
    /// An empty or inverted range.
    #[error("Invalid range [{min}, {max}]!")]
    RangeError {
        /// Lower edge
        min: f64,
        /// Upper edge
        max: f64,
    },
    /// A composite model was given a coefficient list which does not fit its components.
    #[error("A sum of {pdfs} PDFs needs {pdfs} yields or {} fractions, got {coefficients}!", .pdfs.saturating_sub(1))]
    CoefficientCountError {
        /// Number of component PDFs
        pdfs: usize,
        /// Number of coefficients given
        coefficients: usize,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

