use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

#[cfg(feature = "rayon")]
use accurate::{sum::Klein, traits::*};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    utils::{get_bin_edges, get_bin_index},
    PeakfitError, PeakfitResult,
};

/// Expand `~` and environment variables in a path.
pub(crate) fn expand_path(file_path: &str) -> PeakfitResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// Create the directory a file is about to be written into.
pub(crate) fn create_parent_dir(path: &Path) -> PeakfitResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// A one-dimensional observable with a fixed range, such as a measured energy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    /// The name of the observable.
    pub name: String,
    /// An optional human-readable description (used for axis titles).
    pub title: Option<String>,
    /// An optional unit (used for axis titles).
    pub unit: Option<String>,
    min: f64,
    max: f64,
}

impl Observable {
    /// Create a new [`Observable`] covering `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns [`PeakfitError::RangeError`] unless `min < max` and both are finite.
    pub fn new(name: &str, min: f64, max: f64) -> PeakfitResult<Self> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(PeakfitError::RangeError { min, max });
        }
        Ok(Self {
            name: name.to_string(),
            title: None,
            unit: None,
            min,
            max,
        })
    }

    /// Attach a description to the [`Observable`].
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Attach a unit to the [`Observable`].
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// The lower edge of the range.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// The upper edge of the range.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// The range as a tuple.
    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// The width of the range.
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Returns `true` if `value` lies in the (closed) range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Returns `true` if `[lo, hi]` is a non-empty subrange of the observable range.
    pub fn contains_range(&self, range: (f64, f64)) -> bool {
        range.0 < range.1 && self.contains(range.0) && self.contains(range.1)
    }

    /// The edges of `bins` equal-width bins covering the range.
    pub fn bin_edges(&self, bins: usize) -> Vec<f64> {
        get_bin_edges(bins, self.range())
    }
}

/// A single measurement with an associated weight.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The measured value of the observable.
    pub value: f64,
    /// The event weight (1 for generated events).
    pub weight: f64,
}

impl Event {
    /// An [`Event`] with unit weight.
    pub fn new(value: f64) -> Self {
        Self { value, weight: 1.0 }
    }

    /// An [`Event`] with the given weight.
    pub fn weighted(value: f64, weight: f64) -> Self {
        Self { value, weight }
    }
}

/// An ordered collection of [`Event`]s.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// The [`Event`]s contained in the [`Dataset`]
    pub events: Vec<Event>,
}

impl Dataset {
    /// Create a new [`Dataset`] from a list of [`Event`]s.
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Create a new [`Dataset`] of unit-weight events.
    pub fn from_values(values: &[f64]) -> Self {
        Self::new(values.iter().map(|&v| Event::new(v)).collect())
    }

    /// Wrap the [`Dataset`] for sharing with a likelihood.
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The number of [`Event`]s in the [`Dataset`].
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Checks whether or not the [`Dataset`] is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Produces an iterator over the [`Event`]s in the [`Dataset`].
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Produces a parallelized iterator over the [`Event`]s in the [`Dataset`].
    #[cfg(feature = "rayon")]
    pub fn par_iter(&self) -> rayon::slice::Iter<'_, Event> {
        self.events.par_iter()
    }

    /// The observable values of every [`Event`].
    pub fn values(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.value).collect()
    }

    /// Returns the sum of the weights for each [`Event`] in the [`Dataset`].
    #[cfg(feature = "rayon")]
    pub fn weighted_len(&self) -> f64 {
        self.events
            .par_iter()
            .map(|e| e.weight)
            .parallel_sum_with_accumulator::<Klein<f64>>()
    }

    /// Returns the sum of the weights for each [`Event`] in the [`Dataset`].
    #[cfg(not(feature = "rayon"))]
    pub fn weighted_len(&self) -> f64 {
        self.events.iter().map(|e| e.weight).sum()
    }

    /// A new [`Dataset`] containing only the [`Event`]s inside `[range.0, range.1]`.
    pub fn filter_range(&self, range: (f64, f64)) -> Dataset {
        Dataset::new(
            self.events
                .iter()
                .filter(|e| e.value >= range.0 && e.value <= range.1)
                .copied()
                .collect(),
        )
    }

    /// Read a [`Dataset`] from a whitespace-separated text file.
    ///
    /// Each non-empty line holds either `value` or `value weight`. Lines beginning with `#` are
    /// ignored. The path may contain `~` and environment variables.
    pub fn read_text(file_path: &str) -> PeakfitResult<Self> {
        let path = expand_path(file_path)?;
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let value = parse_field(tokens.next(), index + 1, "value")?;
            let weight = match tokens.next() {
                Some(token) => parse_field(Some(token), index + 1, "weight")?,
                None => 1.0,
            };
            if let Some(extra) = tokens.next() {
                return Err(PeakfitError::ParseError {
                    name: extra.to_string(),
                    object: format!("end of line {}", index + 1),
                });
            }
            events.push(Event::weighted(value, weight));
        }
        Ok(Self::new(events))
    }

    /// Write the [`Dataset`] as a text file readable by [`Dataset::read_text`], creating the
    /// parent directory if needed. The path is used as given, without shell expansion.
    pub fn write_text<P: AsRef<Path>>(&self, path: P) -> PeakfitResult<()> {
        let path = path.as_ref();
        create_parent_dir(path)?;
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "# value weight")?;
        for event in &self.events {
            writeln!(writer, "{} {}", event.value, event.weight)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn parse_field(token: Option<&str>, line: usize, field: &str) -> PeakfitResult<f64> {
    let token = token.unwrap_or_default();
    token.parse().map_err(|_| PeakfitError::ParseError {
        name: token.to_string(),
        object: format!("{field} on line {line}"),
    })
}

/// A weighted histogram with evenly spaced bins.
#[derive(Clone, Debug)]
pub struct Histogram {
    /// The number of counts in each bin (can be `f64`s since these might be weighted counts)
    pub counts: Vec<f64>,
    /// The sum of squared weights in each bin
    pub sumw2: Vec<f64>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<f64>,
}

impl Histogram {
    /// Bin a [`Dataset`] with evenly spaced `bins` within the given `range`. Events outside of the
    /// range are ignored.
    pub fn new(dataset: &Dataset, bins: usize, range: (f64, f64)) -> PeakfitResult<Self> {
        if bins == 0 {
            return Err(PeakfitError::Custom(
                "Number of bins must be greater than zero!".to_string(),
            ));
        }
        if !(range.0 < range.1) {
            return Err(PeakfitError::RangeError {
                min: range.0,
                max: range.1,
            });
        }
        let mut counts = vec![0.0; bins];
        let mut sumw2 = vec![0.0; bins];
        for event in dataset.iter() {
            if let Some(bin_index) = get_bin_index(event.value, bins, range) {
                counts[bin_index] += event.weight;
                sumw2[bin_index] += event.weight * event.weight;
            }
        }
        Ok(Self {
            counts,
            sumw2,
            bin_edges: get_bin_edges(bins, range),
        })
    }

    /// The number of bins.
    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// The (uniform) bin width.
    pub fn bin_width(&self) -> f64 {
        self.bin_edges[1] - self.bin_edges[0]
    }

    /// The center of each bin.
    pub fn bin_centers(&self) -> Vec<f64> {
        self.bin_edges
            .windows(2)
            .map(|edges| 0.5 * (edges[0] + edges[1]))
            .collect()
    }

    /// The statistical error of each bin, $`\sqrt{\sum w^2}`$.
    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|w2| w2.sqrt()).collect()
    }

    /// The total (weighted) count.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// The largest bin content plus its error.
    pub fn max_with_error(&self) -> f64 {
        self.counts
            .iter()
            .zip(self.sumw2.iter())
            .map(|(c, w2)| c + w2.sqrt())
            .fold(0.0, f64::max)
    }
}
