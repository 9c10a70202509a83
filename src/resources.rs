use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{PeakfitError, PeakfitResult};

/// A bounded, named free parameter of a fit.
///
/// The bounds may be infinite. A [`Parameter`] only describes the starting point of a fit; the
/// values tried by the minimizer live in the slice passed to [`Parameters::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// The unique name used to refer to this parameter.
    pub name: String,
    /// An optional human-readable description.
    pub title: Option<String>,
    /// The initial value.
    pub value: f64,
    /// The lower bound.
    pub min: f64,
    /// The upper bound.
    pub max: f64,
}

impl Parameter {
    /// Create a new [`Parameter`] with the given initial `value` and bounds.
    ///
    /// # Errors
    ///
    /// Returns [`PeakfitError::BoundsError`] if `min > max`, if the value is outside of
    /// `[min, max]`, or if the value is not a number.
    pub fn new(name: &str, value: f64, min: f64, max: f64) -> PeakfitResult<Self> {
        let parameter = Self {
            name: name.to_string(),
            title: None,
            value,
            min,
            max,
        };
        parameter.validate()?;
        Ok(parameter)
    }

    /// Create a new [`Parameter`] without bounds.
    pub fn unbounded(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    /// Attach a description to the [`Parameter`].
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Check that the bounds are ordered and contain the value.
    pub fn validate(&self) -> PeakfitResult<()> {
        if self.value.is_nan() || self.min > self.max || !self.contains(self.value) {
            return Err(PeakfitError::BoundsError {
                name: self.name.clone(),
                value: self.value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Returns `true` if `value` lies within the bounds (inclusive).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Returns `true` if both bounds are finite.
    pub fn is_bounded(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// The bounds as a tuple.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

/// An enum containing either a free parameter or a constant value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterLike {
    /// A free parameter.
    Parameter(Parameter),
    /// A constant value.
    Constant(f64),
}

impl ParameterLike {
    /// The name of the free parameter, if this is one.
    pub fn name(&self) -> Option<&str> {
        match self {
            ParameterLike::Parameter(parameter) => Some(&parameter.name),
            ParameterLike::Constant(_) => None,
        }
    }

    /// The initial (or constant) value.
    pub fn value(&self) -> f64 {
        match self {
            ParameterLike::Parameter(parameter) => parameter.value,
            ParameterLike::Constant(value) => *value,
        }
    }
}

impl From<Parameter> for ParameterLike {
    fn from(parameter: Parameter) -> Self {
        ParameterLike::Parameter(parameter)
    }
}

/// Shorthand for generating a bounded free parameter.
///
/// Invalid bounds are not reported here but when the parameter is registered with a
/// [`Resources`] struct (for instance by [`AddPdf::new`](crate::model::AddPdf::new)).
pub fn parameter(name: &str, value: f64, min: f64, max: f64) -> ParameterLike {
    ParameterLike::Parameter(Parameter {
        name: name.to_string(),
        title: None,
        value,
        min,
        max,
    })
}

/// Shorthand for generating a constant value (which acts like a fixed parameter).
pub fn constant(value: f64) -> ParameterLike {
    ParameterLike::Constant(value)
}

/// An object which acts as a tag to refer to either a free parameter or a constant value.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterID {
    /// A free parameter.
    Parameter(usize),
    /// A constant value.
    Constant(usize),
    /// An uninitialized ID
    #[default]
    Uninit,
}

/// This struct holds references to the constants and free parameters used in the fit so that they
/// may be obtained from their corresponding [`ParameterID`].
#[derive(Debug)]
pub struct Parameters<'a> {
    pub(crate) parameters: &'a [f64],
    pub(crate) constants: &'a [f64],
}

impl<'a> Parameters<'a> {
    /// Create a new set of [`Parameters`] from a list of floating values and a list of constant values
    pub fn new(parameters: &'a [f64], constants: &'a [f64]) -> Self {
        Self {
            parameters,
            constants,
        }
    }

    /// Obtain a parameter value or constant value from the given [`ParameterID`].
    pub fn get(&self, pid: ParameterID) -> f64 {
        match pid {
            ParameterID::Parameter(index) => self.parameters[index],
            ParameterID::Constant(index) => self.constants[index],
            ParameterID::Uninit => panic!("Parameter has not been registered!"),
        }
    }

    /// The number of free parameters.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }
}

/// The registry of free parameters and constants shared by every component of a model.
///
/// Free parameters are deduplicated by name, so two shapes which mention the same parameter share
/// one fit parameter.
#[derive(Clone, Debug, Default)]
pub struct Resources {
    pub(crate) parameters: IndexMap<String, Parameter>,
    pub(crate) constants: Vec<f64>,
}

impl Resources {
    /// Register a free parameter or constant and obtain the [`ParameterID`] used to look up its
    /// value during evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`PeakfitError::BoundsError`] for invalid bounds and
    /// [`PeakfitError::RegistrationError`] if a parameter of the same name but a different
    /// definition was registered before.
    pub fn register_parameter(&mut self, p: &ParameterLike) -> PeakfitResult<ParameterID> {
        match p {
            ParameterLike::Parameter(parameter) => {
                parameter.validate()?;
                if let Some((index, _, existing)) = self.parameters.get_full(&parameter.name) {
                    if existing.value != parameter.value
                        || existing.min != parameter.min
                        || existing.max != parameter.max
                    {
                        return Err(PeakfitError::RegistrationError {
                            name: parameter.name.clone(),
                        });
                    }
                    return Ok(ParameterID::Parameter(index));
                }
                let (index, _) = self
                    .parameters
                    .insert_full(parameter.name.clone(), parameter.clone());
                Ok(ParameterID::Parameter(index))
            }
            ParameterLike::Constant(value) => {
                self.constants.push(*value);
                Ok(ParameterID::Constant(self.constants.len() - 1))
            }
        }
    }

    /// The registered free parameters in registration order.
    pub fn free_parameters(&self) -> Vec<&Parameter> {
        self.parameters.values().collect()
    }

    /// The names of the registered free parameters in registration order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    /// The index of a free parameter by name.
    pub fn parameter_index(&self, name: &str) -> PeakfitResult<usize> {
        self.parameters
            .get_index_of(name)
            .ok_or_else(|| PeakfitError::ParameterNotFoundError {
                name: name.to_string(),
            })
    }

    /// The number of free parameters.
    pub fn n_free(&self) -> usize {
        self.parameters.len()
    }

    /// The registered constant values.
    pub fn constants(&self) -> &[f64] {
        &self.constants
    }
}
