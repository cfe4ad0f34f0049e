//! Covariate resolution
//!
//! Model covariates are requested by name and resolved once against the
//! effort fields and the [`HabitatSchema`]. After resolution every row is
//! built by index, so an unknown name can only fail here.

use crate::data::{EffortCovariates, EffortField, HabitatSchema, Observation};
use crate::error::{PipelineError, Result};

/// Where a covariate value lives on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Covariate {
    Effort(EffortField),
    Habitat(usize),
}

/// Ordered, resolved covariates used as model inputs.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    names: Vec<String>,
    covariates: Vec<Covariate>,
}

impl FeatureSet {
    /// Resolve covariate names against the effort fields and habitat schema.
    pub fn resolve<S: AsRef<str>>(names: &[S], schema: &HabitatSchema) -> Result<Self> {
        let mut covariates = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let covariate = match EffortField::from_name(name) {
                Some(field) => Covariate::Effort(field),
                None => match schema.position(name) {
                    Some(index) => Covariate::Habitat(index),
                    None => {
                        return Err(PipelineError::MissingCovariate {
                            name: name.to_string(),
                            available: available_names(schema),
                        })
                    }
                },
            };
            covariates.push(covariate);
        }

        if covariates.is_empty() {
            return Err(PipelineError::insufficient("feature set", 1, 0));
        }

        Ok(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            covariates,
        })
    }

    /// All effort covariates followed by every habitat column.
    pub fn all(schema: &HabitatSchema) -> Result<Self> {
        Self::resolve(&available_names(schema), schema)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.covariates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covariates.is_empty()
    }

    pub fn covariate(&self, index: usize) -> Covariate {
        self.covariates[index]
    }

    /// Column index of a named covariate
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| PipelineError::MissingCovariate {
                name: name.to_string(),
                available: self.names.clone(),
            })
    }

    /// Column index of an effort covariate, if the model uses it
    pub fn effort_index(&self, field: EffortField) -> Option<usize> {
        self.covariates
            .iter()
            .position(|c| *c == Covariate::Effort(field))
    }

    pub fn row(&self, effort: &EffortCovariates, habitat: &[f64]) -> Vec<f64> {
        self.covariates
            .iter()
            .map(|covariate| match *covariate {
                Covariate::Effort(field) => effort.get(field),
                Covariate::Habitat(index) => habitat.get(index).copied().unwrap_or(f64::NAN),
            })
            .collect()
    }

    pub fn observation_row(&self, observation: &Observation) -> Vec<f64> {
        self.row(&observation.effort, &observation.habitat)
    }

    /// Row-major feature matrix
    pub fn matrix(&self, observations: &[Observation]) -> Vec<Vec<f64>> {
        observations.iter().map(|o| self.observation_row(o)).collect()
    }

    pub fn labels(observations: &[Observation]) -> Vec<bool> {
        observations.iter().map(|o| o.species_observed).collect()
    }

    /// True if every model covariate (and the location) is finite
    pub fn is_complete(&self, observation: &Observation) -> bool {
        observation.latitude.is_finite()
            && observation.longitude.is_finite()
            && self.observation_row(observation).iter().all(|v| v.is_finite())
    }

    /// Drop records missing any required covariate.
    pub fn complete_cases(&self, observations: &[Observation]) -> Vec<Observation> {
        let kept: Vec<Observation> = observations
            .iter()
            .filter(|o| self.is_complete(o))
            .cloned()
            .collect();

        let dropped = observations.len() - kept.len();
        if dropped > 0 {
            tracing::warn!(
                "Dropped {} of {} checklists with missing covariates",
                dropped,
                observations.len()
            );
        }
        kept
    }
}

fn available_names(schema: &HabitatSchema) -> Vec<String> {
    EffortField::ALL
        .iter()
        .map(|f| f.name().to_string())
        .chain(schema.names().iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn observation(habitat: Vec<f64>) -> Observation {
        Observation {
            checklist_id: "S1".into(),
            latitude: 42.0,
            longitude: -76.0,
            observation_date: NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
            species_observed: true,
            effort: EffortCovariates {
                day_of_year: 152.0,
                time_observations_started: 6.5,
                duration_minutes: 45.0,
                effort_distance_km: 2.0,
                number_observers: 1.0,
                protocol_traveling: 1.0,
            },
            habitat,
        }
    }

    #[test]
    fn test_resolve_and_row_order() {
        let schema = HabitatSchema::new(&["pland_04", "elevation_median"]).unwrap();
        let features =
            FeatureSet::resolve(&["elevation_median", "duration_minutes", "pland_04"], &schema).unwrap();

        let row = features.observation_row(&observation(vec![0.3, 250.0]));
        assert_eq!(row, vec![250.0, 45.0, 0.3]);
        assert_eq!(features.index_of("pland_04").unwrap(), 2);
        assert_eq!(features.effort_index(EffortField::DurationMinutes), Some(1));
        assert_eq!(features.effort_index(EffortField::DayOfYear), None);
    }

    #[test]
    fn test_unknown_covariate_is_missing_covariate_error() {
        let schema = HabitatSchema::new(&["pland_04"]).unwrap();
        match FeatureSet::resolve(&["pland_99"], &schema) {
            Err(PipelineError::MissingCovariate { name, available }) => {
                assert_eq!(name, "pland_99");
                assert!(available.contains(&"pland_04".to_string()));
            }
            other => panic!("expected MissingCovariate, got {:?}", other),
        }
    }

    #[test]
    fn test_complete_cases_drops_nan_rows() {
        let schema = HabitatSchema::new(&["pland_04"]).unwrap();
        let features = FeatureSet::all(&schema).unwrap();
        assert_eq!(features.len(), 7);

        let rows = vec![observation(vec![0.5]), observation(vec![f64::NAN])];
        let kept = features.complete_cases(&rows);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].habitat, vec![0.5]);
    }
}
