//! Data Loading and Record Schema
//!
//! Typed checklist and prediction-grid records, validated once at ingestion.
//! Loading goes through Polars so CSV and Parquet sources share one code path;
//! everything downstream consumes the typed rows and never looks up columns
//! by name again.
//!
//! Missing numeric values are carried as NaN and removed by
//! [`crate::features::FeatureSet::complete_cases`] before the train/test split.

use ahash::AHashMap;
use anyhow::{anyhow, bail, Context};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PipelineError;

/// Effort covariates shared by every checklist.
///
/// `day_of_year` is derived from the observation date; the rest are read
/// from the table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffortCovariates {
    pub day_of_year: f64,
    /// Decimal hours since midnight (0-24)
    pub time_observations_started: f64,
    pub duration_minutes: f64,
    pub effort_distance_km: f64,
    pub number_observers: f64,
    /// 1.0 for traveling counts, 0.0 for stationary
    pub protocol_traveling: f64,
}

/// Named handle on one field of [`EffortCovariates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffortField {
    DayOfYear,
    TimeObservationsStarted,
    DurationMinutes,
    EffortDistanceKm,
    NumberObservers,
    ProtocolTraveling,
}

impl EffortField {
    pub const ALL: [EffortField; 6] = [
        EffortField::DayOfYear,
        EffortField::TimeObservationsStarted,
        EffortField::DurationMinutes,
        EffortField::EffortDistanceKm,
        EffortField::NumberObservers,
        EffortField::ProtocolTraveling,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EffortField::DayOfYear => "day_of_year",
            EffortField::TimeObservationsStarted => "time_observations_started",
            EffortField::DurationMinutes => "duration_minutes",
            EffortField::EffortDistanceKm => "effort_distance_km",
            EffortField::NumberObservers => "number_observers",
            EffortField::ProtocolTraveling => "protocol_traveling",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.name() == name)
    }
}

impl EffortCovariates {
    pub fn get(&self, field: EffortField) -> f64 {
        match field {
            EffortField::DayOfYear => self.day_of_year,
            EffortField::TimeObservationsStarted => self.time_observations_started,
            EffortField::DurationMinutes => self.duration_minutes,
            EffortField::EffortDistanceKm => self.effort_distance_km,
            EffortField::NumberObservers => self.number_observers,
            EffortField::ProtocolTraveling => self.protocol_traveling,
        }
    }

    pub fn set(&mut self, field: EffortField, value: f64) {
        match field {
            EffortField::DayOfYear => self.day_of_year = value,
            EffortField::TimeObservationsStarted => self.time_observations_started = value,
            EffortField::DurationMinutes => self.duration_minutes = value,
            EffortField::EffortDistanceKm => self.effort_distance_km = value,
            EffortField::NumberObservers => self.number_observers = value,
            EffortField::ProtocolTraveling => self.protocol_traveling = value,
        }
    }
}

/// One checklist (sampling event). Immutable after ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub checklist_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observation_date: NaiveDate,
    pub species_observed: bool,
    pub effort: EffortCovariates,
    /// Values in [`HabitatSchema`] column order
    pub habitat: Vec<f64>,
}

impl Observation {
    pub fn year(&self) -> i32 {
        self.observation_date.year()
    }

    /// Week of year, `(day_of_year - 1) / 7 + 1`, in 1..=53
    pub fn week(&self) -> u32 {
        (self.observation_date.ordinal() - 1) / 7 + 1
    }
}

/// One cell of the regular prediction surface. Carries no outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionCell {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub habitat: Vec<f64>,
}

/// Ordered habitat covariate names (land-cover PLAND, elevation summaries).
#[derive(Debug, Clone, Default)]
pub struct HabitatSchema {
    names: Vec<String>,
    index: AHashMap<String, usize>,
}

impl HabitatSchema {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self, PipelineError> {
        let mut index = AHashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let name = name.as_ref();
            if EffortField::from_name(name).is_some() {
                return Err(PipelineError::Schema(format!(
                    "habitat column '{}' clashes with an effort covariate",
                    name
                )));
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(PipelineError::Schema(format!(
                    "duplicate habitat column '{}'",
                    name
                )));
            }
        }
        Ok(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            index,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Read a CSV or Parquet table (chosen by file extension)
fn read_table(path: &Path) -> anyhow::Result<DataFrame> {
    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("parquet"));

    if is_parquet {
        LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to scan parquet: {:?}", path))?
            .collect()
            .with_context(|| format!("Failed to load parquet: {:?}", path))
    } else {
        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("Failed to create CSV reader: {:?}", path))?
            .finish()
            .with_context(|| format!("Failed to load CSV: {:?}", path))
    }
}

fn f64_column(df: &DataFrame, name: &str) -> anyhow::Result<Vec<f64>> {
    let column = df
        .column(name)
        .with_context(|| format!("Missing column '{}'", name))?;
    let cast = column
        .cast(&DataType::Float64)
        .with_context(|| format!("Column '{}' is not numeric", name))?;
    let values = cast
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

fn string_column(df: &DataFrame, name: &str) -> anyhow::Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .with_context(|| format!("Missing column '{}'", name))?;
    let cast = column.cast(&DataType::String)?;
    let values = cast
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(values)
}

fn bool_column(df: &DataFrame, name: &str) -> anyhow::Result<Vec<bool>> {
    let column = df
        .column(name)
        .with_context(|| format!("Missing column '{}'", name))?;

    match column.dtype() {
        DataType::Boolean => column
            .bool()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| v.ok_or_else(|| anyhow!("Null '{}' at row {}", name, row)))
            .collect(),
        DataType::String => column
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| parse_flag(v).ok_or_else(|| anyhow!("Invalid '{}' at row {}: {:?}", name, row, v)))
            .collect(),
        _ => {
            let cast = column.cast(&DataType::Float64)?;
            cast.f64()?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.map(|x| x > 0.0)
                        .ok_or_else(|| anyhow!("Null '{}' at row {}", name, row))
                })
                .collect()
        }
    }
}

fn parse_flag(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Protocol flag from either a numeric `protocol_traveling` column or an
/// eBird-style `protocol_type` column ("Traveling" / "Stationary").
fn protocol_column(df: &DataFrame) -> anyhow::Result<Vec<f64>> {
    let names = df.get_column_names();
    if names.iter().any(|n| n.as_str() == "protocol_traveling") {
        return f64_column(df, "protocol_traveling");
    }
    if names.iter().any(|n| n.as_str() == "protocol_type") {
        return Ok(string_column(df, "protocol_type")?
            .into_iter()
            .map(|v| match v {
                Some(p) if p.eq_ignore_ascii_case("traveling") => 1.0,
                Some(_) => 0.0,
                None => f64::NAN,
            })
            .collect());
    }
    bail!("Missing column 'protocol_traveling' (or 'protocol_type')")
}

fn habitat_rows(df: &DataFrame, schema: &HabitatSchema) -> anyhow::Result<Vec<Vec<f64>>> {
    let columns: Vec<Vec<f64>> = schema
        .names()
        .iter()
        .map(|name| f64_column(df, name))
        .collect::<anyhow::Result<_>>()?;

    Ok((0..df.height())
        .map(|row| columns.iter().map(|col| col[row]).collect())
        .collect())
}

/// Load checklists from CSV/Parquet.
///
/// Required columns: `checklist_id`, `latitude`, `longitude`,
/// `observation_date` (YYYY-MM-DD), `species_observed`,
/// `time_observations_started`, `duration_minutes`, `effort_distance_km`,
/// `number_observers`, `protocol_traveling` or `protocol_type`, plus every
/// habitat column named in `schema`.
pub fn load_observations(path: &Path, schema: &HabitatSchema) -> anyhow::Result<Vec<Observation>> {
    let df = read_table(path)?;

    let ids = string_column(&df, "checklist_id")?;
    let latitudes = f64_column(&df, "latitude")?;
    let longitudes = f64_column(&df, "longitude")?;
    let dates = string_column(&df, "observation_date")?;
    let observed = bool_column(&df, "species_observed")?;
    let time_started = f64_column(&df, "time_observations_started")?;
    let duration = f64_column(&df, "duration_minutes")?;
    let distance = f64_column(&df, "effort_distance_km")?;
    let observers = f64_column(&df, "number_observers")?;
    let protocol = protocol_column(&df)?;
    let habitat = habitat_rows(&df, schema)?;

    let mut observations = Vec::with_capacity(df.height());
    for (row, habitat) in habitat.into_iter().enumerate() {
        let checklist_id = ids[row]
            .clone()
            .ok_or_else(|| anyhow!("Null checklist_id at row {}", row))?;
        let date_str = dates[row]
            .as_deref()
            .ok_or_else(|| anyhow!("Null observation_date at row {}", row))?;
        let observation_date = NaiveDate::parse_from_str(date_str.trim(), DATE_FORMAT)
            .with_context(|| format!("Invalid observation_date '{}' at row {}", date_str, row))?;

        observations.push(Observation {
            checklist_id,
            latitude: latitudes[row],
            longitude: longitudes[row],
            observation_date,
            species_observed: observed[row],
            effort: EffortCovariates {
                day_of_year: f64::from(observation_date.ordinal()),
                time_observations_started: time_started[row],
                duration_minutes: duration[row],
                effort_distance_km: distance[row],
                number_observers: observers[row],
                protocol_traveling: protocol[row],
            },
            habitat,
        });
    }

    tracing::info!(
        "Loaded {} checklists from {:?} ({} habitat covariates)",
        observations.len(),
        path,
        schema.len()
    );
    Ok(observations)
}

/// Load the prediction grid: `id`, `latitude`, `longitude` and the habitat columns.
pub fn load_prediction_grid(path: &Path, schema: &HabitatSchema) -> anyhow::Result<Vec<PredictionCell>> {
    let df = read_table(path)?;

    let id_column = df.column("id").with_context(|| "Missing column 'id'")?;
    let ids: Vec<Option<u64>> = id_column
        .cast(&DataType::UInt64)
        .with_context(|| "Column 'id' is not an unsigned integer")?
        .u64()?
        .into_iter()
        .collect();
    let latitudes = f64_column(&df, "latitude")?;
    let longitudes = f64_column(&df, "longitude")?;
    let habitat = habitat_rows(&df, schema)?;

    let cells = habitat
        .into_iter()
        .enumerate()
        .map(|(row, habitat)| {
            Ok(PredictionCell {
                id: ids[row].ok_or_else(|| anyhow!("Null id at row {}", row))?,
                latitude: latitudes[row],
                longitude: longitudes[row],
                habitat,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!("Loaded {} prediction cells from {:?}", cells.len(), path);
    Ok(cells)
}

/// Habitat column names of a table: every column that is not a known
/// checklist/grid field.
pub fn infer_habitat_columns(path: &Path) -> anyhow::Result<Vec<String>> {
    const RESERVED: [&str; 10] = [
        "checklist_id",
        "id",
        "latitude",
        "longitude",
        "observation_date",
        "species_observed",
        "protocol_type",
        "observer_id",
        "locality_id",
        "year",
    ];
    let df = read_table(path)?;
    Ok(df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| !RESERVED.contains(&name.as_str()) && EffortField::from_name(name).is_none())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_week_buckets() {
        let obs = |date: &str| Observation {
            checklist_id: "S1".into(),
            latitude: 0.0,
            longitude: 0.0,
            observation_date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            species_observed: false,
            effort: EffortCovariates {
                day_of_year: 0.0,
                time_observations_started: 7.0,
                duration_minutes: 60.0,
                effort_distance_km: 1.0,
                number_observers: 1.0,
                protocol_traveling: 1.0,
            },
            habitat: vec![],
        };
        assert_eq!(obs("2019-01-01").week(), 1);
        assert_eq!(obs("2019-01-07").week(), 1);
        assert_eq!(obs("2019-01-08").week(), 2);
        assert_eq!(obs("2019-12-31").week(), 53);
        assert_eq!(obs("2019-12-31").year(), 2019);
    }

    #[test]
    fn test_effort_field_names_round_trip() {
        for field in EffortField::ALL {
            assert_eq!(EffortField::from_name(field.name()), Some(field));
        }
        assert_eq!(EffortField::from_name("pland_04"), None);
    }

    #[test]
    fn test_habitat_schema_rejects_duplicates_and_effort_names() {
        assert!(HabitatSchema::new(&["pland_04", "pland_04"]).is_err());
        assert!(HabitatSchema::new(&["duration_minutes"]).is_err());

        let schema = HabitatSchema::new(&["pland_04", "elevation_median"]).unwrap();
        assert_eq!(schema.position("elevation_median"), Some(1));
        assert_eq!(schema.position("pland_13"), None);
    }

    #[test]
    fn test_load_observations_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(
            file,
            "checklist_id,latitude,longitude,observation_date,species_observed,time_observations_started,duration_minutes,effort_distance_km,number_observers,protocol_type,pland_04"
        )
        .unwrap();
        writeln!(file, "S1,42.1,-76.2,2019-06-15,TRUE,6.5,60,1.2,2,Traveling,0.25").unwrap();
        writeln!(file, "S2,42.2,-76.3,2019-06-16,FALSE,18.0,30,0,1,Stationary,").unwrap();
        file.flush().unwrap();

        let schema = HabitatSchema::new(&["pland_04"]).unwrap();
        let observations = load_observations(file.path(), &schema).unwrap();

        assert_eq!(observations.len(), 2);
        assert!(observations[0].species_observed);
        assert!(!observations[1].species_observed);
        assert_eq!(observations[0].effort.day_of_year, 166.0);
        assert_eq!(observations[0].effort.protocol_traveling, 1.0);
        assert_eq!(observations[1].effort.protocol_traveling, 0.0);
        assert!(observations[1].habitat[0].is_nan());
    }
}
