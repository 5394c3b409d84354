use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::configuration_error;
use crate::error::{ConfigurationError, GlmError};

/// How a parameter enters the rate evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// One value, broadcast to every stage evaluation.
    Static,
    /// One value per time grid point, linearly interpolated to the stage times.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDescriptor {
    name: String,
    shape: Vec<usize>,
    units: Option<String>,
}

impl StateDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    /// Number of scalar elements of one value of the state.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    name: String,
    shape: Vec<usize>,
    units: Option<String>,
    kind: ParameterKind,
}

impl ParameterDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }
    pub fn kind(&self) -> ParameterKind {
        self.kind
    }
}

/// Builder for an [OdeSystem].
///
/// ```
/// use glmsol::OdeSystemBuilder;
///
/// let system = OdeSystemBuilder::new()
///     .time_units("s")
///     .state("position", &[3])
///     .state_with_units("mass", &[], "kg")
///     .static_parameter("drag", &[])
///     .dynamic_parameter("thrust", &[3])
///     .build()
///     .unwrap();
/// assert_eq!(system.state("position").unwrap().size(), 3);
/// assert_eq!(system.state("mass").unwrap().size(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct OdeSystemBuilder {
    time_units: Option<String>,
    states: Vec<StateDescriptor>,
    parameters: Vec<ParameterDescriptor>,
}

impl OdeSystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_units(mut self, units: &str) -> Self {
        self.time_units = Some(units.to_string());
        self
    }

    /// Declare a state. An empty shape declares a scalar.
    pub fn state(mut self, name: &str, shape: &[usize]) -> Self {
        self.states.push(StateDescriptor {
            name: name.to_string(),
            shape: shape.to_vec(),
            units: None,
        });
        self
    }

    pub fn state_with_units(mut self, name: &str, shape: &[usize], units: &str) -> Self {
        self.states.push(StateDescriptor {
            name: name.to_string(),
            shape: shape.to_vec(),
            units: Some(units.to_string()),
        });
        self
    }

    fn parameter(mut self, name: &str, shape: &[usize], kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDescriptor {
            name: name.to_string(),
            shape: shape.to_vec(),
            units: None,
            kind,
        });
        self
    }

    pub fn static_parameter(self, name: &str, shape: &[usize]) -> Self {
        self.parameter(name, shape, ParameterKind::Static)
    }

    pub fn dynamic_parameter(self, name: &str, shape: &[usize]) -> Self {
        self.parameter(name, shape, ParameterKind::Dynamic)
    }

    /// Attach units to the most recently declared parameter.
    pub fn with_parameter_units(mut self, units: &str) -> Self {
        if let Some(p) = self.parameters.last_mut() {
            p.units = Some(units.to_string());
        }
        self
    }

    pub fn build(self) -> Result<OdeSystem, GlmError> {
        if self.states.is_empty() {
            return Err(configuration_error!(NoStates));
        }
        let mut states = BTreeMap::new();
        let mut parameters = BTreeMap::new();
        for state in self.states {
            if state.shape.contains(&0) {
                return Err(configuration_error!(InvalidShape, state.name));
            }
            if states.contains_key(&state.name) {
                return Err(configuration_error!(DuplicateName, state.name));
            }
            states.insert(state.name.clone(), state);
        }
        for parameter in self.parameters {
            if parameter.shape.contains(&0) {
                return Err(configuration_error!(InvalidShape, parameter.name));
            }
            if states.contains_key(&parameter.name) || parameters.contains_key(&parameter.name) {
                return Err(configuration_error!(DuplicateName, parameter.name));
            }
            parameters.insert(parameter.name.clone(), parameter);
        }
        Ok(OdeSystem {
            time_units: self.time_units,
            states,
            parameters,
        })
    }
}

/// The immutable declaration of the states and parameters of an ODE system.
///
/// States and parameters are kept in name order, which fixes the order in which states are
/// concatenated wherever several of them share one vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdeSystem {
    time_units: Option<String>,
    states: BTreeMap<String, StateDescriptor>,
    parameters: BTreeMap<String, ParameterDescriptor>,
}

impl OdeSystem {
    pub fn time_units(&self) -> Option<&str> {
        self.time_units.as_deref()
    }

    pub fn state(&self, name: &str) -> Result<&StateDescriptor, GlmError> {
        self.states
            .get(name)
            .ok_or_else(|| configuration_error!(UnknownState, name.to_string()))
    }

    pub fn parameter(&self, name: &str) -> Result<&ParameterDescriptor, GlmError> {
        self.parameters
            .get(name)
            .ok_or_else(|| configuration_error!(UnknownParameter, name.to_string()))
    }

    pub fn states(&self) -> impl Iterator<Item = &StateDescriptor> {
        self.states.values()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters.values()
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_sorted_by_name() {
        let system = OdeSystemBuilder::new()
            .state("z", &[2, 2])
            .state("a", &[])
            .dynamic_parameter("p", &[3])
            .with_parameter_units("m/s")
            .build()
            .unwrap();
        let names: Vec<_> = system.states().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "z"]);
        assert_eq!(system.state("z").unwrap().size(), 4);
        let p = system.parameter("p").unwrap();
        assert_eq!(p.kind(), ParameterKind::Dynamic);
        assert_eq!(p.units(), Some("m/s"));
    }

    #[test]
    fn invalid_declarations() {
        let err = OdeSystemBuilder::new().build().unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::NoStates)
        ));
        let err = OdeSystemBuilder::new()
            .state("y", &[1])
            .static_parameter("y", &[1])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::DuplicateName(_))
        ));
        let err = OdeSystemBuilder::new()
            .state("y", &[2, 0])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::InvalidShape(_))
        ));
        let system = OdeSystemBuilder::new().state("y", &[1]).build().unwrap();
        assert!(system.state("x").is_err());
        assert!(system.parameter("k").is_err());
    }
}
