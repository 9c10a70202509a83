//! The sample program: three Gaussian peaks on a Chebyshev background.
//!
//! [`run`] performs the fixed sequence of the classic fitter sample:
//!
//! 1. declare the observable,
//! 2. build one [`Gaussian`] per configured peak,
//! 3. build the [`Chebyshev`] background,
//! 4. sum everything with one yield per component into an extended [`AddPdf`],
//! 5. generate (or read) the events,
//! 6. fit the model to them,
//! 7. write the [`FitResult`] table,
//! 8. plot the binned data with the fitted model and one dashed curve per component.

use std::path::PathBuf;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    config::SampleConfig,
    data::Dataset,
    likelihoods::{MinimizerOptions, NLL},
    model::AddPdf,
    pdfs::{chebyshev::Chebyshev, gaussian::Gaussian, Pdf},
    plot::PlotFrame,
    results::{CovarianceQuality, FitResult},
    utils::enums::LineStyle,
    PeakfitResult,
};

/// Everything produced by [`run`].
#[derive(Clone, Debug)]
pub struct SampleOutcome {
    pub fit: FitResult,
    /// The number of events generated or read.
    pub n_events: usize,
    pub results_path: PathBuf,
    pub plot_path: PathBuf,
    pub data_path: Option<PathBuf>,
}

/// Build the extended peaks-plus-background model described by `config`.
pub fn build_model(config: &SampleConfig) -> PeakfitResult<AddPdf> {
    let observable = config.observable.to_observable()?;
    let mut pdfs: Vec<Box<dyn Pdf>> = Vec::with_capacity(config.peaks.len() + 1);
    let mut yields = Vec::with_capacity(config.peaks.len() + 1);
    for peak in &config.peaks {
        pdfs.push(Gaussian::new(
            &peak.name,
            peak.mean.to_parameter()?,
            peak.width.to_parameter()?,
        ));
        yields.push(peak.yield_.to_parameter()?);
    }
    let coefficients = config
        .background
        .coefficients
        .iter()
        .map(|c| c.to_parameter())
        .collect::<PeakfitResult<Vec<_>>>()?;
    pdfs.push(Chebyshev::new(
        &config.background.name,
        &observable,
        coefficients,
    ));
    yields.push(config.background.yield_.to_parameter()?);
    AddPdf::new("model", &observable, pdfs, yields)
}

fn rng(config: &SampleConfig) -> ChaCha8Rng {
    match config.generation.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Read the configured input file, or generate events from `model` at its initial values.
pub fn load_or_generate(
    config: &SampleConfig,
    model: &AddPdf,
    rng: &mut dyn RngCore,
) -> PeakfitResult<Dataset> {
    if let Some(input) = &config.input {
        let dataset = Dataset::read_text(input)?;
        tracing::info!(path = %input, events = dataset.len(), "read dataset");
        return Ok(dataset);
    }
    let values = model.initial_values();
    let dataset = if config.generation.extended {
        model.generate_extended(&values, rng)?
    } else {
        model.generate(&values, config.generation.events, rng)?
    };
    tracing::info!(
        events = dataset.len(),
        extended = config.generation.extended,
        "generated dataset"
    );
    Ok(dataset)
}

/// Plot the data, the fitted model and every component into a frame.
pub fn build_plot(
    config: &SampleConfig,
    model: &AddPdf,
    dataset: &Dataset,
    fit: &FitResult,
) -> PeakfitResult<PlotFrame> {
    let mut frame = PlotFrame::new(model.observable(), config.plot.bins)?
        .with_title(&config.plot.title)
        .with_x_title(&config.plot.x_title)
        .with_size(config.plot.width, config.plot.height);
    if let Some(y_title) = &config.plot.y_title {
        frame = frame.with_y_title(y_title);
    }
    frame.plot_data("data", dataset)?;
    let values = fit.values();
    let range = config.fit.range;
    frame.plot_model(
        "model",
        model,
        &values,
        range,
        None,
        config.plot.model_color,
        LineStyle::Solid,
    )?;
    for peak in &config.peaks {
        frame.plot_model(
            &peak.name,
            model,
            &values,
            range,
            Some(&format!("{},{}", peak.name, peak.yield_.name)),
            peak.color,
            LineStyle::Dashed,
        )?;
    }
    let background = &config.background;
    frame.plot_model(
        &background.name,
        model,
        &values,
        range,
        Some(&format!("{},{}", background.name, background.yield_.name)),
        background.color,
        LineStyle::Dashed,
    )?;
    Ok(frame)
}

/// Run the whole sample program.
pub fn run(config: &SampleConfig) -> PeakfitResult<SampleOutcome> {
    config.validate()?;
    let span = tracing::info_span!("fitter_sample");
    let _guard = span.enter();

    let model = build_model(config)?;
    tracing::info!(
        components = model.n_components(),
        parameters = model.parameters().len(),
        "built model"
    );

    let mut rng = rng(config);
    let dataset = load_or_generate(config, &model, &mut rng)?;
    let data_path = match &config.output.data_file {
        Some(file) => {
            let path = config.output_directory()?.join(file);
            dataset.write_text(&path)?;
            Some(path)
        }
        None => None,
    };

    let nll = NLL::new(&model, &dataset, Some(config.fit.range), config.fit.threads)?;
    let options = MinimizerOptions::default()
        .with_algorithm(config.fit.algorithm)
        .with_max_steps(config.fit.max_steps)
        .with_hesse(config.fit.hesse);
    let fit = nll.minimize(Some(options))?;
    if !fit.converged {
        tracing::warn!(status = %fit.status, "fit did not converge");
    }
    if config.fit.hesse && fit.covariance_quality != CovarianceQuality::Full {
        tracing::warn!(quality = %fit.covariance_quality, "covariance matrix is not accurate");
    }
    for parameter in fit.parameters.iter().filter(|p| p.at_limit()) {
        tracing::warn!(parameter = %parameter.name, value = parameter.value, "parameter at limit");
    }

    let results_path = config.results_path()?;
    fit.write(&results_path, config.output.verbose)?;

    let plot_path = config.plot_path()?;
    build_plot(config, &model, &dataset, &fit)?.save(&plot_path)?;

    tracing::info!(
        results = %results_path.display(),
        plot = %plot_path.display(),
        min_nll = fit.min_nll,
        "done"
    );
    Ok(SampleOutcome {
        fit,
        n_events: dataset.len(),
        results_path,
        plot_path,
        data_path,
    })
}
