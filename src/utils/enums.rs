use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::PeakfitError;

/// The stroke used to draw a curve on a [`PlotFrame`](crate::plot::PlotFrame).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    /// A continuous line.
    #[default]
    Solid,
    /// A line broken into evenly spaced dashes.
    Dashed,
}
impl Display for LineStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineStyle::Solid => write!(f, "solid"),
            LineStyle::Dashed => write!(f, "dashed"),
        }
    }
}
impl FromStr for LineStyle {
    type Err = PeakfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "solid" | "line" | "-" => Ok(Self::Solid),
            "dashed" | "dash" | "--" => Ok(Self::Dashed),
            _ => Err(PeakfitError::ParseError {
                name: s.to_string(),
                object: "LineStyle".to_string(),
            }),
        }
    }
}

/// A small palette of named colors for curves and data points.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotColor {
    /// Pure black.
    Black,
    /// The default color of the total model curve.
    #[default]
    Blue,
    /// Pure red.
    Red,
    /// Pure green.
    Green,
    /// A muted grey-green, used for background components.
    Sage,
    /// Magenta.
    Magenta,
    /// Orange.
    Orange,
}
impl PlotColor {
    /// The color as an `(r, g, b)` triple.
    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            PlotColor::Black => (0, 0, 0),
            PlotColor::Blue => (0, 0, 255),
            PlotColor::Red => (255, 0, 0),
            PlotColor::Green => (0, 255, 0),
            PlotColor::Sage => (178, 204, 153),
            PlotColor::Magenta => (255, 0, 255),
            PlotColor::Orange => (255, 128, 0),
        }
    }
}
impl Display for PlotColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlotColor::Black => write!(f, "black"),
            PlotColor::Blue => write!(f, "blue"),
            PlotColor::Red => write!(f, "red"),
            PlotColor::Green => write!(f, "green"),
            PlotColor::Sage => write!(f, "sage"),
            PlotColor::Magenta => write!(f, "magenta"),
            PlotColor::Orange => write!(f, "orange"),
        }
    }
}
impl FromStr for PlotColor {
    type Err = PeakfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "black" | "k" => Ok(Self::Black),
            "blue" | "b" => Ok(Self::Blue),
            "red" | "r" => Ok(Self::Red),
            "green" | "g" => Ok(Self::Green),
            "sage" | "grey-green" | "gray-green" => Ok(Self::Sage),
            "magenta" | "m" => Ok(Self::Magenta),
            "orange" => Ok(Self::Orange),
            _ => Err(PeakfitError::ParseError {
                name: s.to_string(),
                object: "PlotColor".to_string(),
            }),
        }
    }
}

/// The [`ganesh`] algorithm used to minimize a negative log-likelihood.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MinimizerAlgorithm {
    /// The limited-memory quasi-Newton L-BFGS-B method, which supports bounds natively.
    #[default]
    Lbfgsb,
    /// The gradient-free Nelder-Mead simplex method.
    NelderMead,
}
impl Display for MinimizerAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MinimizerAlgorithm::Lbfgsb => write!(f, "L-BFGS-B"),
            MinimizerAlgorithm::NelderMead => write!(f, "Nelder-Mead"),
        }
    }
}
impl FromStr for MinimizerAlgorithm {
    type Err = PeakfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lbfgsb" | "l-bfgs-b" | "bfgs" => Ok(Self::Lbfgsb),
            "nelder-mead" | "neldermead" | "nelder mead" | "simplex" => Ok(Self::NelderMead),
            _ => Err(PeakfitError::ParseError {
                name: s.to_string(),
                object: "MinimizerAlgorithm".to_string(),
            }),
        }
    }
}
