//! # Sample configuration
//!
//! Everything the sample program does is driven by a [`SampleConfig`]. Its defaults reproduce
//! the classic three-peak gamma spectrum; any subset of the fields may be overridden from YAML.
//!
//! ## Search path
//!
//! [`SampleConfig::discover`] loads the first configuration found:
//! 1. an explicitly given path (the `--config` flag of `fitter-sample`),
//! 2. the path in the `PEAKFIT_CONFIG` environment variable,
//! 3. `./peakfit.yaml`,
//!
//! and falls back to [`SampleConfig::default`] otherwise.
//!
//! ## Example
//!
//! ```yaml
//! generation:
//!   events: 20000
//!   seed: 7
//! fit:
//!   threads: 4
//!   range: [1200.0, 2000.0]
//!   algorithm: nelder-mead
//! output:
//!   directory: "~/spectra/run-7"
//! logging:
//!   level: debug
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    data::{expand_path, Observable},
    logging::LogConfig,
    resources::{Parameter, ParameterLike},
    utils::enums::{MinimizerAlgorithm, PlotColor},
    PeakfitError, PeakfitResult,
};

/// The environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "PEAKFIT_CONFIG";
/// The configuration file looked up in the working directory.
pub const LOCAL_CONFIG: &str = "peakfit.yaml";

/// A bounded free parameter as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl ParameterConfig {
    pub fn new(name: &str, value: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            value,
            min,
            max,
        }
    }

    pub fn with_title(self, title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..self
        }
    }

    /// Build the validated free parameter.
    pub fn to_parameter(&self) -> PeakfitResult<ParameterLike> {
        let parameter = Parameter::new(&self.name, self.value, self.min, self.max)?;
        Ok(match &self.title {
            Some(title) => parameter.with_title(title),
            None => parameter,
        }
        .into())
    }
}

/// The observable and its range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservableConfig {
    pub name: String,
    pub title: Option<String>,
    pub unit: Option<String>,
    pub min: f64,
    pub max: f64,
}

impl Default for ObservableConfig {
    fn default() -> Self {
        Self {
            name: "genergy".to_string(),
            title: None,
            unit: Some("keV".to_string()),
            min: 1000.0,
            max: 2000.0,
        }
    }
}

impl ObservableConfig {
    pub fn to_observable(&self) -> PeakfitResult<Observable> {
        let mut observable = Observable::new(&self.name, self.min, self.max)?;
        if let Some(title) = &self.title {
            observable = observable.with_title(title);
        }
        if let Some(unit) = &self.unit {
            observable = observable.with_unit(unit);
        }
        Ok(observable)
    }
}

/// A Gaussian peak with its yield and the colour of its curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakConfig {
    pub name: String,
    pub mean: ParameterConfig,
    pub width: ParameterConfig,
    #[serde(rename = "yield")]
    pub yield_: ParameterConfig,
    #[serde(default)]
    pub color: PlotColor,
}

impl PeakConfig {
    fn numbered(
        i: usize,
        mean: (f64, f64, f64),
        width: (f64, f64, f64),
        events: f64,
        color: PlotColor,
    ) -> Self {
        Self {
            name: format!("peak_{i}"),
            mean: ParameterConfig::new(&format!("sig_m{i}"), mean.0, mean.1, mean.2),
            width: ParameterConfig::new(&format!("sig_w{i}"), width.0, width.1, width.2),
            yield_: ParameterConfig::new(&format!("nsig{i}"), events, 0.0, 100_000.0)
                .with_title(&format!("number of events in peak {i}")),
            color,
        }
    }
}

/// The Chebyshev background with its yield and the colour of its curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub name: String,
    pub coefficients: Vec<ParameterConfig>,
    #[serde(rename = "yield")]
    pub yield_: ParameterConfig,
    pub color: PlotColor,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            name: "bkg".to_string(),
            coefficients: vec![
                ParameterConfig::new("a0", -0.3, -1.0, 1.0).with_title("a0"),
                ParameterConfig::new("a1", 0.1, -3.0, 3.0).with_title("a1"),
            ],
            yield_: ParameterConfig::new("nbkg", 70_000.0, 0.0, 100_000.0)
                .with_title("number of background events"),
            color: PlotColor::Sage,
        }
    }
}

/// Monte Carlo generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub events: usize,
    /// Seed of the random number generator (drawn from the OS if absent)
    pub seed: Option<u64>,
    /// Draw the number of events from a Poisson distribution around the total yield instead
    pub extended: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            events: 100_000,
            seed: None,
            extended: false,
        }
    }
}

/// Likelihood and minimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Worker threads used to evaluate the likelihood
    pub threads: usize,
    pub range: (f64, f64),
    pub algorithm: MinimizerAlgorithm,
    pub max_steps: usize,
    /// Estimate uncertainties from the Hessian after the minimization
    pub hesse: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            threads: 3,
            range: (1000.0, 2000.0),
            algorithm: MinimizerAlgorithm::Lbfgsb,
            max_steps: 4000,
            hesse: true,
        }
    }
}

/// Plot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub bins: usize,
    pub title: String,
    pub x_title: String,
    /// Derived from the bin width if absent
    pub y_title: Option<String>,
    pub width: u32,
    pub height: u32,
    pub model_color: PlotColor,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            bins: 100,
            title: "Gamma spectra".to_string(),
            x_title: "energy (keV)".to_string(),
            y_title: None,
            width: 700,
            height: 500,
            model_color: PlotColor::Blue,
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Created if missing; shell expansions such as `~` and `$HOME` are applied
    pub directory: String,
    pub results_file: String,
    pub plot_file: String,
    /// Also write the generated events as text
    pub data_file: Option<String>,
    /// Include constants, initial values and global correlations in the results file
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "results".to_string(),
            results_file: "fitResults.fit".to_string(),
            plot_file: "results.svg".to_string(),
            data_file: None,
            verbose: false,
        }
    }
}

/// The complete configuration of the sample program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    pub observable: ObservableConfig,
    pub peaks: Vec<PeakConfig>,
    pub background: BackgroundConfig,
    /// Read events from this text file instead of generating them
    pub input: Option<String>,
    pub generation: GenerationConfig,
    pub fit: FitConfig,
    pub plot: PlotConfig,
    pub output: OutputConfig,
    pub logging: LogConfig,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            observable: ObservableConfig::default(),
            peaks: vec![
                PeakConfig::numbered(
                    1,
                    (1350.0, 1300.0, 1400.0),
                    (10.0, 0.0, 20.0),
                    15_000.0,
                    PlotColor::Red,
                ),
                PeakConfig::numbered(
                    2,
                    (1420.0, 1380.0, 1450.0),
                    (15.0, 0.0, 20.0),
                    10_000.0,
                    PlotColor::Blue,
                ),
                PeakConfig::numbered(
                    3,
                    (1850.0, 1750.0, 1950.0),
                    (15.0, 0.0, 20.0),
                    5_000.0,
                    PlotColor::Green,
                ),
            ],
            background: BackgroundConfig::default(),
            input: None,
            generation: GenerationConfig::default(),
            fit: FitConfig::default(),
            plot: PlotConfig::default(),
            output: OutputConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl SampleConfig {
    /// Parse a YAML document. Missing fields take their default values.
    pub fn parse(yaml: &str) -> PeakfitResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file (the path is shell-expanded).
    pub fn load(file_path: &str) -> PeakfitResult<Self> {
        Self::load_path(&expand_path(file_path)?)
    }

    fn load_path(path: &Path) -> PeakfitResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Find and load a configuration following the search path in the module documentation.
    /// Returns the configuration and the file it came from, if any.
    ///
    /// # Errors
    ///
    /// Fails if the explicit path or the file named by `PEAKFIT_CONFIG` cannot be read or
    /// parsed. A missing `./peakfit.yaml` is not an error.
    pub fn discover(explicit: Option<&str>) -> PeakfitResult<(Self, Option<PathBuf>)> {
        let from_env = std::env::var(CONFIG_ENV).ok();
        Self::discover_from(explicit, from_env.as_deref(), Path::new("."))
    }

    fn discover_from(
        explicit: Option<&str>,
        from_env: Option<&str>,
        working_dir: &Path,
    ) -> PeakfitResult<(Self, Option<PathBuf>)> {
        if let Some(file_path) = explicit {
            let path = expand_path(file_path)?;
            return Ok((Self::load_path(&path)?, Some(path)));
        }
        if let Some(file_path) = from_env.filter(|f| !f.is_empty()) {
            let path = expand_path(file_path)?;
            if !path.is_file() {
                return Err(PeakfitError::Custom(format!(
                    "{CONFIG_ENV} points to a missing file: {}",
                    path.display()
                )));
            }
            return Ok((Self::load_path(&path)?, Some(path)));
        }
        let local = working_dir.join(LOCAL_CONFIG);
        if local.is_file() {
            return Ok((Self::load_path(&local)?, Some(local)));
        }
        Ok((Self::default(), None))
    }

    /// Set the number of events to generate and rescale the initial yields so that they add up
    /// to it, keeping every yield inside its bounds.
    pub fn set_events(&mut self, events: usize) {
        self.generation.events = events;
        let total: f64 = self.yields().map(|y| y.value).sum();
        if total.is_nan() || total <= 0.0 {
            return;
        }
        let scale = events as f64 / total;
        for y in self
            .peaks
            .iter_mut()
            .map(|peak| &mut peak.yield_)
            .chain(std::iter::once(&mut self.background.yield_))
        {
            if y.min <= y.max {
                y.value = (y.value * scale).clamp(y.min, y.max);
            }
        }
    }

    /// The yield of every peak followed by the background yield.
    pub fn yields(&self) -> impl Iterator<Item = &ParameterConfig> {
        self.peaks
            .iter()
            .map(|peak| &peak.yield_)
            .chain(std::iter::once(&self.background.yield_))
    }

    pub fn to_yaml(&self) -> PeakfitResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the configuration for values that cannot produce a fit.
    pub fn validate(&self) -> PeakfitResult<()> {
        let invalid = |message: &str| Err(PeakfitError::Custom(format!("invalid config: {message}")));
        let observable = self.observable.to_observable()?;
        if self.peaks.is_empty() {
            return invalid("at least one peak is required");
        }
        if self.input.is_none() && self.generation.events == 0 {
            return invalid("generation.events must be > 0");
        }
        if self.fit.threads == 0 {
            return invalid("fit.threads must be > 0");
        }
        if self.fit.max_steps == 0 {
            return invalid("fit.max_steps must be > 0");
        }
        let (lo, hi) = self.fit.range;
        if !(lo < hi) {
            return Err(PeakfitError::RangeError { min: lo, max: hi });
        }
        if !observable.contains_range(self.fit.range) {
            return invalid(&format!(
                "fit.range [{lo}, {hi}] is outside of the observable range [{}, {}]",
                observable.min(),
                observable.max()
            ));
        }
        if self.plot.bins == 0 {
            return invalid("plot.bins must be > 0");
        }
        if self.plot.width == 0 || self.plot.height == 0 {
            return invalid("plot.width and plot.height must be > 0");
        }
        let plot_extension = Path::new(&self.output.plot_file)
            .extension()
            .and_then(|extension| extension.to_str());
        if !plot_extension.is_some_and(|extension| extension.eq_ignore_ascii_case("svg")) {
            return invalid("output.plot_file must end in .svg");
        }
        for parameter in self.parameters() {
            parameter.to_parameter()?;
        }
        Ok(())
    }

    /// Every parameter declared in the configuration, peaks first.
    pub fn parameters(&self) -> Vec<&ParameterConfig> {
        self.peaks
            .iter()
            .flat_map(|peak| [&peak.mean, &peak.width, &peak.yield_])
            .chain(self.background.coefficients.iter())
            .chain(std::iter::once(&self.background.yield_))
            .collect()
    }

    /// The output directory after shell expansion.
    pub fn output_directory(&self) -> PeakfitResult<PathBuf> {
        expand_path(&self.output.directory)
    }

    pub fn results_path(&self) -> PeakfitResult<PathBuf> {
        Ok(self.output_directory()?.join(&self.output.results_file))
    }

    pub fn plot_path(&self) -> PeakfitResult<PathBuf> {
        Ok(self.output_directory()?.join(&self.output.plot_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::tests::scratch_path, logging::LogLevel};

    #[test]
    fn test_defaults() {
        let config = SampleConfig::default();
        config.validate().unwrap();
        assert_eq!(config.peaks.len(), 3);
        assert_eq!(config.peaks[1].mean.name, "sig_m2");
        assert_eq!(config.peaks[2].yield_.value, 5000.0);
        assert_eq!(config.background.coefficients.len(), 2);
        assert_eq!(config.generation.events, 100_000);
        assert_eq!(config.fit.threads, 3);
        assert_eq!(config.fit.range, (1000.0, 2000.0));
        assert_eq!(config.plot.bins, 100);
        assert_eq!((config.plot.width, config.plot.height), (700, 500));
        assert_eq!(
            config.results_path().unwrap(),
            PathBuf::from("results").join("fitResults.fit")
        );
        let names: Vec<&str> = config.parameters().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "sig_m1", "sig_w1", "nsig1", "sig_m2", "sig_w2", "nsig2", "sig_m3", "sig_w3",
                "nsig3", "a0", "a1", "nbkg"
            ]
        );
    }

    #[test]
    fn test_partial_yaml() {
        let config = SampleConfig::parse(
            "generation:\n  events: 500\n  seed: 3\nfit:\n  threads: 1\n  range: [1200.0, 1900.0]\n  algorithm: nelder-mead\nlogging:\n  level: debug\n",
        )
        .unwrap();
        assert_eq!(config.generation.events, 500);
        assert_eq!(config.generation.seed, Some(3));
        assert_eq!(config.fit.threads, 1);
        assert_eq!(config.fit.range, (1200.0, 1900.0));
        assert_eq!(config.fit.algorithm, MinimizerAlgorithm::NelderMead);
        assert_eq!(config.fit.max_steps, 4000);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.peaks.len(), 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_round_trip_and_load() {
        let mut config = SampleConfig::default();
        config.generation.seed = Some(11);
        config.peaks.truncate(1);
        let path = scratch_path("config/peakfit.yaml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();
        let loaded = SampleConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, config);
        let (discovered, source) = SampleConfig::discover(path.to_str()).unwrap();
        assert_eq!(discovered, config);
        assert_eq!(source, Some(path.clone()));
        assert!(SampleConfig::load("/definitely/not/here.yaml").is_err());
        assert!(SampleConfig::parse("fit: [").is_err());
    }

    #[test]
    fn test_discover_search_order() {
        let dir = scratch_path("config/discover");
        std::fs::create_dir_all(&dir).unwrap();
        let local = dir.join(LOCAL_CONFIG);
        std::fs::write(&local, "generation:\n  events: 111\n").unwrap();
        let from_env = dir.join("from-env.yaml");
        std::fs::write(&from_env, "generation:\n  events: 222\n").unwrap();
        let explicit = dir.join("explicit.yaml");
        std::fs::write(&explicit, "generation:\n  events: 333\n").unwrap();
        let env = from_env.to_str();

        let (config, source) =
            SampleConfig::discover_from(explicit.to_str(), env, &dir).unwrap();
        assert_eq!(config.generation.events, 333);
        assert_eq!(source, Some(explicit.clone()));

        let (config, source) = SampleConfig::discover_from(None, env, &dir).unwrap();
        assert_eq!(config.generation.events, 222);
        assert_eq!(source, Some(from_env.clone()));

        let (config, source) = SampleConfig::discover_from(None, None, &dir).unwrap();
        assert_eq!(config.generation.events, 111);
        assert_eq!(source, Some(local.clone()));
        // an empty variable counts as unset
        let (config, _) = SampleConfig::discover_from(None, Some(""), &dir).unwrap();
        assert_eq!(config.generation.events, 111);

        let empty = scratch_path("config/empty-dir");
        std::fs::create_dir_all(&empty).unwrap();
        let (config, source) = SampleConfig::discover_from(None, None, &empty).unwrap();
        assert_eq!(config, SampleConfig::default());
        assert!(source.is_none());
    }

    #[test]
    fn test_discover_missing_env_file_is_an_error() {
        let dir = scratch_path("config/missing-env");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(LOCAL_CONFIG), "generation:\n  events: 111\n").unwrap();
        let missing = dir.join("not-there.yaml");
        let err = SampleConfig::discover_from(None, missing.to_str(), &dir).unwrap_err();
        assert!(matches!(err, PeakfitError::Custom(_)));
        assert!(err.to_string().contains(CONFIG_ENV));
    }

    #[test]
    fn test_set_events_rescales_yields() {
        let mut config = SampleConfig::default();
        config.set_events(2000);
        assert_eq!(config.generation.events, 2000);
        let yields: Vec<f64> = config.yields().map(|y| y.value).collect();
        for (value, expected) in yields.iter().zip([300.0, 200.0, 100.0, 1400.0]) {
            assert!((value - expected).abs() < 1e-9);
        }
        assert!((yields.iter().sum::<f64>() - 2000.0).abs() < 1e-9);
        config.validate().unwrap();

        // yields are kept inside their bounds
        let mut config = SampleConfig::default();
        config.set_events(1_000_000);
        assert!(config.yields().all(|y| y.value <= y.max));
        assert_eq!(config.background.yield_.value, 100_000.0);

        let mut config = SampleConfig::default();
        for peak in config.peaks.iter_mut() {
            peak.yield_.value = 0.0;
        }
        config.background.yield_.value = 0.0;
        config.set_events(500);
        assert_eq!(config.generation.events, 500);
        assert!(config.yields().all(|y| y.value == 0.0));
    }

    #[test]
    fn test_default_unit() {
        let observable = SampleConfig::default().observable.to_observable().unwrap();
        assert_eq!(observable.unit.as_deref(), Some("keV"));
        let frame = crate::plot::PlotFrame::new(&observable, 100).unwrap();
        assert_eq!(frame.y_title(), "Events / ( 10 keV )");
    }

    #[test]
    fn test_validation() {
        let mut config = SampleConfig::default();
        config.peaks.clear();
        assert!(config.validate().is_err());

        let mut config = SampleConfig::default();
        config.generation.events = 0;
        assert!(config.validate().is_err());
        config.input = Some("events.txt".to_string());
        assert!(config.validate().is_ok());

        let mut config = SampleConfig::default();
        config.fit.threads = 0;
        assert!(config.validate().is_err());

        let mut config = SampleConfig::default();
        config.plot.bins = 0;
        assert!(config.validate().is_err());

        let mut config = SampleConfig::default();
        config.output.plot_file = "results.eps".to_string();
        assert!(config.validate().is_err());
        config.output.plot_file = "results".to_string();
        assert!(config.validate().is_err());
        config.output.plot_file = "Results.SVG".to_string();
        assert!(config.validate().is_ok());

        let mut config = SampleConfig::default();
        config.fit.range = (1500.0, 1200.0);
        assert!(matches!(
            config.validate(),
            Err(PeakfitError::RangeError { .. })
        ));

        let mut config = SampleConfig::default();
        config.fit.range = (900.0, 1500.0);
        assert!(config.validate().is_err());

        let mut config = SampleConfig::default();
        config.observable.max = 500.0;
        assert!(config.validate().is_err());

        let mut config = SampleConfig::default();
        config.peaks[0].width.value = 25.0;
        assert!(matches!(
            config.validate(),
            Err(PeakfitError::BoundsError { .. })
        ));
    }

    #[test]
    fn test_parameter_config() {
        let parameter = ParameterConfig::new("nsig1", 10.0, 0.0, 100.0)
            .with_title("number of events in peak 1")
            .to_parameter()
            .unwrap();
        match parameter {
            ParameterLike::Parameter(p) => {
                assert_eq!(p.name, "nsig1");
                assert_eq!(p.title.as_deref(), Some("number of events in peak 1"));
            }
            ParameterLike::Constant(_) => panic!("expected a free parameter"),
        }
        assert!(ParameterConfig::new("x", 1.0, 2.0, 3.0).to_parameter().is_err());
    }
}
