use std::{
    fmt::Display,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use nalgebra::DMatrix;

use crate::{
    data::create_parent_dir, utils::enums::MinimizerAlgorithm, PeakfitError, PeakfitResult,
};

/// Column width used for parameter names in printed tables.
const NAME_WIDTH: usize = 20;

/// The quality of the covariance matrix attached to a [`FitResult`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CovarianceQuality {
    /// No covariance matrix was computed.
    NotCalculated,
    /// The Hessian was not positive definite and only its diagonal was inverted.
    NotPositiveDefinite,
    /// The Hessian was inverted but the minimizer did not report convergence.
    Approximate,
    /// A full, accurate covariance matrix.
    Full,
}

impl CovarianceQuality {
    /// A numeric code from 0 (not calculated) to 3 (full and accurate).
    pub fn code(&self) -> u8 {
        match self {
            Self::NotCalculated => 0,
            Self::NotPositiveDefinite => 1,
            Self::Approximate => 2,
            Self::Full => 3,
        }
    }
}

impl Display for CovarianceQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotCalculated => write!(f, "not calculated"),
            Self::NotPositiveDefinite => write!(f, "not positive definite, diagonal only"),
            Self::Approximate => write!(f, "approximate"),
            Self::Full => write!(f, "full, accurate covariance matrix"),
        }
    }
}

/// A free parameter after the fit.
#[derive(Clone, Debug)]
pub struct FitParameter {
    pub name: String,
    pub title: Option<String>,
    /// The value before the fit.
    pub initial: f64,
    pub value: f64,
    /// The symmetric uncertainty from the covariance matrix (`NaN` if none was computed).
    pub error: f64,
    pub min: f64,
    pub max: f64,
}

impl FitParameter {
    /// Returns `true` if the fitted value is within a small distance of one of its bounds.
    pub fn at_limit(&self) -> bool {
        let tolerance = 1e-6 * (self.max - self.min).abs().min(self.value.abs().max(1.0));
        (self.value - self.min).abs() <= tolerance || (self.max - self.value).abs() <= tolerance
    }
}

/// The outcome of minimizing a negative log-likelihood.
#[derive(Clone, Debug)]
pub struct FitResult {
    /// The name of the fitted model.
    pub model: String,
    /// The free parameters, in the model's order.
    pub parameters: Vec<FitParameter>,
    /// Constant values used by the model.
    pub constants: Vec<f64>,
    /// The value of the negative log-likelihood at the minimum.
    pub min_nll: f64,
    /// The estimated vertical distance to the minimum.
    pub edm: f64,
    pub covariance: DMatrix<f64>,
    pub covariance_quality: CovarianceQuality,
    /// Whether the minimizer reported convergence.
    pub converged: bool,
    /// The final status message of the minimizer.
    pub status: String,
    pub algorithm: MinimizerAlgorithm,
    /// The number of likelihood evaluations used by the minimization and error estimate.
    pub n_evaluations: usize,
    /// The weighted number of events in the fit range.
    pub n_events: f64,
    /// The fit range.
    pub range: (f64, f64),
}

impl FitResult {
    fn index(&self, name: &str) -> PeakfitResult<usize> {
        self.parameters
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| PeakfitError::ParameterNotFoundError {
                name: name.to_string(),
            })
    }

    /// Look up a fitted parameter by name.
    pub fn parameter(&self, name: &str) -> PeakfitResult<&FitParameter> {
        Ok(&self.parameters[self.index(name)?])
    }

    /// The fitted value of a parameter.
    pub fn value(&self, name: &str) -> PeakfitResult<f64> {
        Ok(self.parameter(name)?.value)
    }

    /// The uncertainty of a parameter.
    pub fn error(&self, name: &str) -> PeakfitResult<f64> {
        Ok(self.parameter(name)?.error)
    }

    /// The fitted values of all free parameters, in order.
    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    /// The names of all free parameters, in order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// The correlation coefficient between two parameters.
    pub fn correlation(&self, a: &str, b: &str) -> PeakfitResult<f64> {
        let (i, j) = (self.index(a)?, self.index(b)?);
        Ok(self.correlation_matrix()[(i, j)])
    }

    /// The correlation matrix derived from the covariance matrix. Parameters without variance
    /// have zero correlation with everything but themselves.
    pub fn correlation_matrix(&self) -> DMatrix<f64> {
        let n = self.parameters.len();
        let sigma: Vec<f64> = (0..n).map(|i| self.covariance[(i, i)].max(0.0).sqrt()).collect();
        DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                1.0
            } else if sigma[i] > 0.0 && sigma[j] > 0.0 {
                self.covariance[(i, j)] / (sigma[i] * sigma[j])
            } else {
                0.0
            }
        })
    }

    /// The global correlation coefficient of every parameter,
    /// ```math
    /// \rho_i = \sqrt{1 - \frac{1}{V_{ii} (V^{-1})_{ii}}}
    /// ```
    /// or `None` if the covariance matrix cannot be inverted.
    pub fn global_correlations(&self) -> Option<Vec<f64>> {
        if self.covariance_quality == CovarianceQuality::NotCalculated {
            return None;
        }
        let inverse = self.covariance.clone().try_inverse()?;
        Some(
            (0..self.parameters.len())
                .map(|i| {
                    let product = self.covariance[(i, i)] * inverse[(i, i)];
                    if product > 0.0 {
                        (1.0 - 1.0 / product).max(0.0).sqrt()
                    } else {
                        0.0
                    }
                })
                .collect(),
        )
    }

    /// Print a table of the fit status, parameters and correlations. The verbose form adds
    /// constants, initial values, global correlations and bound flags.
    pub fn print_multiline<W: Write>(&self, writer: &mut W, verbose: bool) -> std::io::Result<()> {
        writeln!(writer)?;
        writeln!(writer, "  Fit result of model \"{}\" ({})", self.model, self.algorithm)?;
        writeln!(writer)?;
        writeln!(
            writer,
            "    minimized -log(L): {:.6}, estimated distance to minimum: {:.4e}",
            self.min_nll, self.edm
        )?;
        writeln!(
            writer,
            "    covariance matrix quality: {} ({})",
            self.covariance_quality,
            self.covariance_quality.code()
        )?;
        writeln!(
            writer,
            "    status: {} ({})",
            if self.converged { "converged" } else { "not converged" },
            self.status
        )?;
        writeln!(
            writer,
            "    events in [{}, {}]: {}, likelihood evaluations: {}",
            self.range.0, self.range.1, self.n_events, self.n_evaluations
        )?;
        writeln!(writer)?;

        if verbose && !self.constants.is_empty() {
            writeln!(writer, "  {:>NAME_WIDTH$}  {:>12}", "Constant", "Value")?;
            writeln!(writer, "  {}  {}", "-".repeat(NAME_WIDTH), "-".repeat(12))?;
            for (i, c) in self.constants.iter().enumerate() {
                writeln!(writer, "  {:>NAME_WIDTH$}  {:>12.4e}", format!("#{i}"), c)?;
            }
            writeln!(writer)?;
        }

        let global = if verbose {
            self.global_correlations()
        } else {
            None
        };
        if verbose {
            writeln!(
                writer,
                "  {:>NAME_WIDTH$}  {:>12}  {:>12} +/- {:>9}  {:>8}",
                "Floating Parameter", "InitialValue", "FinalValue", "Error", "GblCorr."
            )?;
            writeln!(
                writer,
                "  {}  {}  {}  {}",
                "-".repeat(NAME_WIDTH),
                "-".repeat(12),
                "-".repeat(26),
                "-".repeat(8)
            )?;
        } else {
            writeln!(
                writer,
                "  {:>NAME_WIDTH$}  {:>12} +/- {:>9}",
                "Floating Parameter", "FinalValue", "Error"
            )?;
            writeln!(writer, "  {}  {}", "-".repeat(NAME_WIDTH), "-".repeat(26))?;
        }
        for (i, p) in self.parameters.iter().enumerate() {
            let flag = if p.at_limit() { "  (at limit)" } else { "" };
            if verbose {
                let gbl = global
                    .as_ref()
                    .map(|g| format!("{:.6}", g[i]))
                    .unwrap_or_else(|| "<none>".to_string());
                writeln!(
                    writer,
                    "  {:>NAME_WIDTH$}  {:>12.4e}  {:>12.4e} +/- {:>9.2e}  {:>8}{}",
                    p.name, p.initial, p.value, p.error, gbl, flag
                )?;
            } else {
                writeln!(
                    writer,
                    "  {:>NAME_WIDTH$}  {:>12.4e} +/- {:>9.2e}",
                    p.name, p.value, p.error
                )?;
            }
        }
        writeln!(writer)?;

        if self.covariance_quality != CovarianceQuality::NotCalculated {
            let correlation = self.correlation_matrix();
            writeln!(writer, "  Correlation matrix")?;
            write!(writer, "  {:>NAME_WIDTH$}", "")?;
            for p in &self.parameters {
                let short: String = p.name.chars().take(8).collect();
                write!(writer, " {short:>8}")?;
            }
            writeln!(writer)?;
            for (i, p) in self.parameters.iter().enumerate() {
                write!(writer, "  {:>NAME_WIDTH$}", p.name)?;
                for j in 0..self.parameters.len() {
                    write!(writer, " {:>8.4}", correlation[(i, j)])?;
                }
                writeln!(writer)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Write the table to a file, creating its parent directory if needed.
    pub fn write<P: AsRef<Path>>(&self, path: P, verbose: bool) -> PeakfitResult<()> {
        let path = path.as_ref();
        create_parent_dir(path)?;
        let mut writer = BufWriter::new(File::create(path)?);
        self.print_multiline(&mut writer, verbose)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "wrote fit result");
        Ok(())
    }
}

impl Display for FitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buffer = Vec::new();
        self.print_multiline(&mut buffer, false)
            .map_err(|_| std::fmt::Error)?;
        write!(f, "{}", String::from_utf8_lossy(&buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::scratch_path;
    use approx::assert_relative_eq;

    fn result() -> FitResult {
        let parameter = |name: &str, value: f64, error: f64, min: f64, max: f64| FitParameter {
            name: name.to_string(),
            title: None,
            initial: value,
            value,
            error,
            min,
            max,
        };
        FitResult {
            model: "model".to_string(),
            parameters: vec![
                parameter("mean", 1350.2, 0.5, 1300.0, 1400.0),
                parameter("width", 20.0, 0.2, 0.0, 20.0),
                parameter("nsig", 2000.0, 50.0, 0.0, 100000.0),
            ],
            constants: vec![0.5],
            min_nll: -12345.678,
            edm: 1e-5,
            covariance: DMatrix::from_row_slice(
                3,
                3,
                &[0.25, 0.05, 0.0, 0.05, 0.04, 2.0, 0.0, 2.0, 2500.0],
            ),
            covariance_quality: CovarianceQuality::Full,
            converged: true,
            status: "converged".to_string(),
            algorithm: MinimizerAlgorithm::Lbfgsb,
            n_evaluations: 120,
            n_events: 10000.0,
            range: (1000.0, 2000.0),
        }
    }

    #[test]
    fn test_lookup() {
        let result = result();
        assert_relative_eq!(result.value("mean").unwrap(), 1350.2);
        assert_relative_eq!(result.error("nsig").unwrap(), 50.0);
        assert_eq!(result.values(), vec![1350.2, 20.0, 2000.0]);
        assert_eq!(result.parameter_names(), vec!["mean", "width", "nsig"]);
        assert!(matches!(
            result.value("sigma"),
            Err(PeakfitError::ParameterNotFoundError { .. })
        ));
    }

    #[test]
    fn test_correlations() {
        let result = result();
        assert_relative_eq!(result.correlation("mean", "width").unwrap(), 0.5);
        assert_relative_eq!(result.correlation("width", "nsig").unwrap(), 0.2);
        assert_relative_eq!(result.correlation("mean", "nsig").unwrap(), 0.0);
        let matrix = result.correlation_matrix();
        assert_relative_eq!(matrix[(1, 1)], 1.0);
        assert_relative_eq!(matrix[(0, 1)], matrix[(1, 0)]);
        let global = result.global_correlations().unwrap();
        assert!(global.iter().all(|g| (0.0..=1.0).contains(g)));
        // width is correlated with both others, so it has the largest global correlation
        assert!(global[1] > global[0] && global[1] > global[2]);
    }

    #[test]
    fn test_at_limit() {
        let result = result();
        assert!(!result.parameter("mean").unwrap().at_limit());
        assert!(result.parameter("width").unwrap().at_limit());
    }

    #[test]
    fn test_print_multiline() {
        let result = result();
        let mut buffer = Vec::new();
        result.print_multiline(&mut buffer, false).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("Floating Parameter"));
        assert!(text.contains("mean"));
        assert!(text.contains("1.3502e3"));
        assert!(text.contains("Correlation matrix"));
        assert!(!text.contains("InitialValue"));
        let mut buffer = Vec::new();
        result.print_multiline(&mut buffer, true).unwrap();
        let verbose = String::from_utf8(buffer).unwrap();
        assert!(verbose.contains("InitialValue"));
        assert!(verbose.contains("GblCorr."));
        assert!(verbose.contains("(at limit)"));
        assert!(verbose.contains("Constant"));
        assert_eq!(format!("{result}"), text);
    }

    #[test]
    fn test_print_without_covariance() {
        let mut result = result();
        result.covariance_quality = CovarianceQuality::NotCalculated;
        assert!(result.global_correlations().is_none());
        let text = result.to_string();
        assert!(!text.contains("Correlation matrix"));
        assert!(text.contains("not calculated"));
    }

    #[test]
    fn test_write() {
        let result = result();
        let path = scratch_path("nested/fitResults.fit");
        result.write(&path, false).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, result.to_string());
    }

    #[test]
    fn test_write_does_not_expand_path() {
        let result = result();
        let path = scratch_path("$PEAKFIT_UNSET_DIR/~/fitResults.fit");
        result.write(&path, true).unwrap();
        assert!(path.is_file());
    }
}
