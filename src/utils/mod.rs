/// Enumerations for plot styling and minimizer selection.
pub mod enums;
/// Special functions used by the built-in [`Pdf`](crate::pdfs::Pdf)s and the likelihood.
pub mod functions;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`](crate::data::Histogram)
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`. The upper edge of the range is included in the last bin so
/// that events generated exactly at the boundary are not lost.
///
/// # See Also
/// [`Histogram`](crate::data::Histogram)
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value <= limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// Evenly spaced points covering `range` (both ends included).
pub fn linspace(range: (f64, f64), n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![range.0],
        _ => {
            let step = (range.1 - range.0) / (n - 1) as f64;
            (0..n).map(|i| range.0 + i as f64 * step).collect()
        }
    }
}
