use serde::{Deserialize, Serialize};

use crate::configuration_error;
use crate::error::{ConfigurationError, GlmError};
use crate::ode_solver::coupling::Formulation;
use crate::ode_solver::time_grid::TimeGrid;
use crate::scheme::SchemeName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub maximum_iterations: usize,
    pub atol: f64,
    pub rtol: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            maximum_iterations: 100,
            atol: 1e-12,
            rtol: 1e-12,
        }
    }
}

/// Configuration of an [crate::Integrator], usually read from TOML:
///
/// ```
/// use glmsol::{Formulation, IntegratorConfig, SchemeName};
///
/// let config = IntegratorConfig::from_toml_str(r#"
///     scheme = "BDF2"
///     formulation = "exposed"
///     initial_time = 0.0
///     final_time = 2.0
///     num_times = 21
///
///     [newton]
///     maximum_iterations = 20
/// "#).unwrap();
/// assert_eq!(config.scheme, SchemeName::BDF2);
/// assert_eq!(config.formulation, Formulation::Exposed);
/// assert_eq!(config.time_grid().unwrap().num_times(), 21);
/// assert_eq!(config.newton.atol, 1e-12);
/// ```
///
/// The time grid is given either as explicit `times`, or as `initial_time`, `final_time` and
/// either `num_times` (uniform) or `normalized_times`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorConfig {
    pub scheme: SchemeName,
    #[serde(default)]
    pub formulation: Formulation,
    #[serde(default)]
    pub times: Option<Vec<f64>>,
    #[serde(default)]
    pub normalized_times: Option<Vec<f64>>,
    #[serde(default)]
    pub initial_time: Option<f64>,
    #[serde(default)]
    pub final_time: Option<f64>,
    #[serde(default)]
    pub num_times: Option<usize>,
    #[serde(default)]
    pub newton: NewtonConfig,
}

impl IntegratorConfig {
    pub fn new(scheme: SchemeName, grid: &TimeGrid) -> Self {
        Self {
            scheme,
            formulation: Formulation::default(),
            times: Some(grid.times().to_vec()),
            normalized_times: None,
            initial_time: None,
            final_time: None,
            num_times: None,
            newton: NewtonConfig::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, GlmError> {
        toml::from_str(s).map_err(|e| configuration_error!(Parse, e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, GlmError> {
        toml::to_string(self).map_err(|e| configuration_error!(Parse, e.to_string()))
    }

    pub fn time_grid(&self) -> Result<TimeGrid, GlmError> {
        if let Some(times) = &self.times {
            return TimeGrid::from_times(times.clone());
        }
        let (Some(t0), Some(tf)) = (self.initial_time, self.final_time) else {
            return Err(configuration_error!(
                TimeGrid,
                "either times or initial_time and final_time must be given".to_string()
            ));
        };
        match (&self.normalized_times, self.num_times) {
            (Some(normalized), _) => TimeGrid::new(normalized, t0, tf),
            (None, Some(n)) => TimeGrid::uniform(t0, tf, n),
            (None, None) => Err(configuration_error!(
                TimeGrid,
                "either num_times or normalized_times must be given".to_string()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trip_through_toml() {
        let grid = TimeGrid::uniform(0.0, 1.0, 3).unwrap();
        let mut config = IntegratorConfig::new(SchemeName::RK4, &grid);
        config.newton.maximum_iterations = 7;
        let s = config.to_toml_string().unwrap();
        let parsed = IntegratorConfig::from_toml_str(&s).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.formulation, Formulation::Embedded);
    }

    #[test]
    fn bad_configs() {
        let err = IntegratorConfig::from_toml_str("scheme = \"RK5\"").unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::Parse(_))
        ));
        let config = IntegratorConfig::from_toml_str("scheme = \"RK4\"").unwrap();
        assert!(config.time_grid().is_err());
        let config = IntegratorConfig::from_toml_str(
            "scheme = \"RK4\"\ninitial_time = 0.0\nfinal_time = 1.0\nnormalized_times = [0.0, 0.5, 1.0]",
        )
        .unwrap();
        assert_eq!(config.time_grid().unwrap().times(), &[0.0, 0.5, 1.0]);
    }
}
