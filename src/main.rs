use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use peakfit::{
    config::SampleConfig,
    logging::{init_logging, LogFormat, LogLevel},
    sample, PeakfitResult,
};

/// Fit three Gaussian peaks on a Chebyshev background to a generated gamma spectrum, then write
/// the fit result and a plot of the spectrum.
#[derive(Debug, Parser)]
#[command(name = "fitter-sample", version, about)]
struct Cli {
    /// YAML configuration file (defaults to $PEAKFIT_CONFIG, then ./peakfit.yaml).
    #[arg(short, long)]
    config: Option<String>,

    /// Directory receiving the fit result and the plot.
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Number of events to generate.
    #[arg(short = 'n', long)]
    events: Option<usize>,

    /// Seed of the event generator.
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads used to evaluate the likelihood.
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Log format (pretty, compact, json).
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Print the effective configuration as YAML and exit.
    #[arg(long)]
    dump_config: bool,
}

impl Cli {
    /// Load the configuration and apply the command-line overrides. Also returns the file the
    /// configuration was read from, if any.
    fn resolve(&self) -> PeakfitResult<(SampleConfig, Option<PathBuf>)> {
        let (config, source) = SampleConfig::discover(self.config.as_deref())?;
        Ok((self.apply(config), source))
    }

    fn apply(&self, mut config: SampleConfig) -> SampleConfig {
        if let Some(directory) = &self.output_dir {
            config.output.directory = directory.clone();
        }
        if let Some(events) = self.events {
            config.set_events(events);
        }
        if let Some(seed) = self.seed {
            config.generation.seed = Some(seed);
        }
        if let Some(threads) = self.threads {
            config.fit.threads = threads;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config, source) = match cli.resolve() {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("fitter-sample: {err}");
            return ExitCode::FAILURE;
        }
    };
    if cli.dump_config {
        return match config.to_yaml() {
            Ok(yaml) => {
                print!("{yaml}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("fitter-sample: {err}");
                ExitCode::FAILURE
            }
        };
    }
    init_logging(&config.logging);
    match &source {
        Some(path) => tracing::info!(path = %path.display(), "loaded configuration"),
        None => tracing::info!("using the built-in configuration"),
    }
    match sample::run(&config) {
        Ok(outcome) => {
            println!("{}", outcome.fit);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "fitter-sample failed");
            eprintln!("fitter-sample: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_file(name: &str, yaml: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("peakfit-cli-{}", std::process::id()))
            .join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "fitter-sample",
            "--output-dir",
            "/tmp/spectra",
            "-n",
            "2000",
            "--seed",
            "7",
            "-j",
            "8",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        let config = cli.apply(SampleConfig::default());
        assert_eq!(config.output.directory, "/tmp/spectra");
        assert_eq!(config.generation.events, 2000);
        assert_eq!(config.generation.seed, Some(7));
        assert_eq!(config.fit.threads, 8);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        // the yields follow the number of events
        let total: f64 = config.yields().map(|y| y.value).sum();
        assert!((total - 2000.0).abs() < 1e-9);
        assert!(!cli.dump_config);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let cli = Cli::try_parse_from(["fitter-sample"]).unwrap();
        assert_eq!(cli.apply(SampleConfig::default()), SampleConfig::default());
        assert!(Cli::try_parse_from(["fitter-sample", "--log-level", "loud"]).is_err());
        assert!(Cli::try_parse_from(["fitter-sample", "--threads", "-1"]).is_err());
    }

    #[test]
    fn test_resolve_from_file() {
        let path = config_file(
            "resolve.yaml",
            "generation:\n  events: 500\n  seed: 3\nfit:\n  threads: 1\n",
        );
        let cli = Cli::try_parse_from([
            "fitter-sample",
            "--config",
            path.to_str().unwrap(),
            "--threads",
            "2",
        ])
        .unwrap();
        let (config, source) = cli.resolve().unwrap();
        assert_eq!(source, Some(path));
        assert_eq!(config.generation.events, 500);
        assert_eq!(config.generation.seed, Some(3));
        assert_eq!(config.fit.threads, 2);

        let cli = Cli::try_parse_from(["fitter-sample", "-c", "/definitely/not/here.yaml"]).unwrap();
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_dump_config_round_trips() {
        let path = config_file("dump.yaml", "fit:\n  algorithm: nelder-mead\n");
        let cli = Cli::try_parse_from([
            "fitter-sample",
            "--dump-config",
            "--config",
            path.to_str().unwrap(),
            "--seed",
            "11",
        ])
        .unwrap();
        assert!(cli.dump_config);
        let (config, _) = cli.resolve().unwrap();
        let yaml = config.to_yaml().unwrap();
        let reparsed = SampleConfig::parse(&yaml).unwrap();
        assert_eq!(reparsed, config);
        assert_eq!(reparsed.generation.seed, Some(11));
        assert_eq!(
            reparsed.fit.algorithm,
            peakfit::utils::enums::MinimizerAlgorithm::NelderMead
        );
    }
}
