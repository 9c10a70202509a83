use std::{io::Write, path::Path};

use plotters::prelude::*;

use crate::{
    data::{create_parent_dir, Dataset, Histogram, Observable},
    model::AddPdf,
    utils::{
        enums::{LineStyle, PlotColor},
        linspace,
    },
    PeakfitError, PeakfitResult,
};

/// Number of points used to draw each curve.
const CURVE_POINTS: usize = 1000;
/// Headroom above the tallest element of the frame.
const Y_MARGIN: f64 = 1.1;

/// A binned dataset drawn as points with vertical error bars.
#[derive(Clone, Debug)]
pub struct DataSeries {
    pub name: String,
    pub histogram: Histogram,
}

/// A model or model component drawn as a line, already scaled to events per bin.
#[derive(Clone, Debug)]
pub struct Curve {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    pub color: PlotColor,
    pub style: LineStyle,
}

/// A frame over the range of an [`Observable`] that collects binned data and model curves and
/// renders them to SVG.
///
/// Curves are scaled to the bin width of the frame, so a model normalized to the number of
/// events lines up with the binned data.
#[derive(Clone, Debug)]
pub struct PlotFrame {
    observable: Observable,
    bins: usize,
    title: String,
    x_title: String,
    y_title: Option<String>,
    size: (u32, u32),
    data: Vec<DataSeries>,
    curves: Vec<Curve>,
}

impl PlotFrame {
    /// Create an empty frame with `bins` bins over the observable range.
    ///
    /// # Errors
    ///
    /// Fails if `bins` is zero.
    pub fn new(observable: &Observable, bins: usize) -> PeakfitResult<Self> {
        if bins == 0 {
            return Err(PeakfitError::PlotError(
                "A frame needs at least one bin".to_string(),
            ));
        }
        let label = observable.title.as_deref().unwrap_or(&observable.name);
        let x_title = match &observable.unit {
            Some(unit) => format!("{label} ({unit})"),
            None => label.to_string(),
        };
        Ok(Self {
            observable: observable.clone(),
            bins,
            title: format!("A plot of {label}"),
            x_title,
            y_title: None,
            size: (700, 500),
            data: Vec::new(),
            curves: Vec::new(),
        })
    }

    pub fn with_title(self, title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..self
        }
    }

    pub fn with_x_title(self, x_title: &str) -> Self {
        Self {
            x_title: x_title.to_string(),
            ..self
        }
    }

    /// Override the default y-axis title, `"Events / ( <bin width> )"`.
    pub fn with_y_title(self, y_title: &str) -> Self {
        Self {
            y_title: Some(y_title.to_string()),
            ..self
        }
    }

    /// Set the canvas size in pixels (default: 700 by 500).
    pub fn with_size(self, width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            ..self
        }
    }

    /// The width of a single bin.
    pub fn bin_width(&self) -> f64 {
        self.observable.width() / self.bins as f64
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The y-axis title, either the one given or one derived from the bin width.
    pub fn y_title(&self) -> String {
        self.y_title.clone().unwrap_or_else(|| {
            let width = self.bin_width();
            match &self.observable.unit {
                Some(unit) => format!("Events / ( {width} {unit} )"),
                None => format!("Events / ( {width} )"),
            }
        })
    }

    /// The binned datasets drawn so far.
    pub fn data(&self) -> &[DataSeries] {
        &self.data
    }

    /// The curves drawn so far.
    pub fn curves(&self) -> &[Curve] {
        &self.curves
    }

    /// Bin `dataset` over the observable range and add it to the frame.
    pub fn plot_data(&mut self, name: &str, dataset: &Dataset) -> PeakfitResult<&Histogram> {
        let histogram = Histogram::new(dataset, self.bins, self.observable.range())?;
        tracing::debug!(name, entries = histogram.total(), "plotted data");
        self.data.push(DataSeries {
            name: name.to_string(),
            histogram,
        });
        Ok(&self.data[self.data.len() - 1].histogram)
    }

    /// Draw `model` at the given parameter values over `range`, or only the components named in
    /// `components` (see [`AddPdf::select`]).
    ///
    /// An extended model is scaled to its expected number of events. A fraction model is scaled
    /// to the entries of the most recently plotted dataset that fall inside `range`.
    #[allow(clippy::too_many_arguments)]
    pub fn plot_model(
        &mut self,
        name: &str,
        model: &AddPdf,
        values: &[f64],
        range: (f64, f64),
        components: Option<&str>,
        color: PlotColor,
        style: LineStyle,
    ) -> PeakfitResult<&Curve> {
        if !self.observable.contains_range(range) {
            return Err(PeakfitError::RangeError {
                min: range.0,
                max: range.1,
            });
        }
        let events = match model.expected_events(values) {
            Some(events) => events,
            None => self
                .data
                .last()
                .map(|series| in_range_entries(&series.histogram, range))
                .ok_or_else(|| {
                    PeakfitError::PlotError(format!(
                        "Cannot normalize the non-extended model \"{}\" without plotted data",
                        model.name()
                    ))
                })?,
        };
        let scale = events * self.bin_width();
        let points: Vec<(f64, f64)> = match components {
            Some(selection) => {
                let selection = model.select(selection)?;
                linspace(range, CURVE_POINTS)
                    .into_iter()
                    .map(|x| (x, scale * model.component_density(values, &selection, x, range)))
                    .collect()
            }
            None => linspace(range, CURVE_POINTS)
                .into_iter()
                .map(|x| (x, scale * model.density(values, x, range)))
                .collect(),
        };
        tracing::debug!(name, events, ?components, "plotted model");
        self.curves.push(Curve {
            name: name.to_string(),
            points,
            color,
            style,
        });
        Ok(&self.curves[self.curves.len() - 1])
    }

    /// The top of the y-axis.
    pub fn y_max(&self) -> f64 {
        let data_max = self
            .data
            .iter()
            .map(|series| series.histogram.max_with_error())
            .fold(0.0, f64::max);
        let curve_max = self
            .curves
            .iter()
            .flat_map(|curve| curve.points.iter().map(|p| p.1))
            .filter(|y| y.is_finite())
            .fold(0.0, f64::max);
        let top = data_max.max(curve_max) * Y_MARGIN;
        if top > 0.0 {
            top
        } else {
            1.0
        }
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: DrawingArea<DB, plotters::coord::Shift>,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        DB::ErrorType: 'static,
    {
        root.fill(&WHITE)?;
        let (x_min, x_max) = self.observable.range();
        let y_title = self.y_title();
        let mut chart = ChartBuilder::on(&root)
            .caption(&self.title, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_min..x_max, 0.0..self.y_max())?;
        chart
            .configure_mesh()
            .disable_x_mesh()
            .disable_y_mesh()
            .x_desc(self.x_title.as_str())
            .y_desc(y_title.as_str())
            .draw()?;

        for series in &self.data {
            let centers = series.histogram.bin_centers();
            let errors = series.histogram.errors();
            let bars: Vec<(f64, f64, f64)> = centers
                .iter()
                .zip(series.histogram.counts.iter().zip(errors.iter()))
                .map(|(&x, (&y, &e))| (x, y, e))
                .collect();
            chart
                .draw_series(bars.iter().map(|&(x, y, e)| {
                    ErrorBar::new_vertical(x, (y - e).max(0.0), y, y + e, BLACK.stroke_width(1), 0)
                }))?
                .label(series.name.as_str())
                .legend(|(x, y)| Circle::new((x + 10, y), 3, BLACK.filled()));
            chart.draw_series(
                bars.iter()
                    .map(|&(x, y, _)| Circle::new((x, y), 2, BLACK.filled())),
            )?;
        }

        for curve in &self.curves {
            let (r, g, b) = curve.color.rgb();
            let color = RGBColor(r, g, b);
            let style = color.stroke_width(2);
            let annotation = match curve.style {
                LineStyle::Solid => chart.draw_series(LineSeries::new(curve.points.clone(), style))?,
                LineStyle::Dashed => chart.draw_series(DashedLineSeries::new(
                    curve.points.clone(),
                    8,
                    5,
                    style,
                ))?,
            };
            annotation
                .label(curve.name.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
        }

        if !self.data.is_empty() || !self.curves.is_empty() {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .position(SeriesLabelPosition::UpperRight)
                .draw()?;
        }
        root.present()?;
        Ok(())
    }

    /// Render the frame as an SVG document.
    pub fn render_svg(&self) -> PeakfitResult<String> {
        let mut buffer = String::new();
        {
            let root = SVGBackend::with_string(&mut buffer, self.size).into_drawing_area();
            self.draw(root)
                .map_err(|e| PeakfitError::PlotError(e.to_string()))?;
        }
        Ok(buffer)
    }

    /// Render the frame as SVG and write it to `path`, creating its parent directory if needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PeakfitResult<()> {
        let path = path.as_ref();
        let svg = self.render_svg()?;
        create_parent_dir(path)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(svg.as_bytes())?;
        tracing::info!(path = %path.display(), "wrote plot");
        Ok(())
    }
}

fn in_range_entries(histogram: &Histogram, range: (f64, f64)) -> f64 {
    histogram
        .bin_centers()
        .iter()
        .zip(histogram.counts.iter())
        .filter(|(x, _)| (range.0..=range.1).contains(*x))
        .map(|(_, c)| c)
        .sum()
}
