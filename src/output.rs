//! Output tables
//!
//! Prediction, importance and partial-dependence tables are written as CSV,
//! or Parquet when the path ends in `.parquet`. The run summary (report
//! record, full metrics, peak time, diagnostics) is pretty-printed JSON.

use anyhow::Context;
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::analysis::{ImportanceRow, PdRow, PeakTime};
use crate::error::ClipDiagnostics;
use crate::evaluation::{EvaluationReport, ReportRecord};
use crate::pipeline::{PipelineOutputs, StageCounts};
use crate::prediction::{CellEstimate, StandardObservation};

#[derive(Debug, Clone, Serialize)]
pub struct ForestSummary {
    pub n_trees: usize,
    pub positive_fraction: f64,
    pub per_class_draws: usize,
}

/// Everything except the tables, for the JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub record: ReportRecord,
    pub metrics: EvaluationReport,
    pub counts: StageCounts,
    pub forest: ForestSummary,
    pub peak: Option<PeakTime>,
    pub standard_observation: StandardObservation,
    pub calibration_domain: (f64, f64),
    pub calibration_clipping: ClipDiagnostics,
    pub surface_clipping: ClipDiagnostics,
    pub surface_incomplete: usize,
}

impl From<&PipelineOutputs> for RunSummary {
    fn from(outputs: &PipelineOutputs) -> Self {
        RunSummary {
            record: outputs.record(),
            metrics: outputs.report,
            counts: outputs.counts,
            forest: ForestSummary {
                n_trees: outputs.forest.n_trees(),
                positive_fraction: outputs.forest.positive_fraction(),
                per_class_draws: outputs.forest.per_class_draws(),
            },
            peak: outputs.peak,
            standard_observation: outputs.standard_observation,
            calibration_domain: outputs.calibration.domain(),
            calibration_clipping: outputs.calibration_clipping,
            surface_clipping: outputs.surface.clipping,
            surface_incomplete: outputs.surface.incomplete,
        }
    }
}

/// Cells without an estimate (missing covariates) get a null `estimate`.
pub fn predictions_frame(estimates: &[CellEstimate]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new("id".into(), estimates.iter().map(|e| e.id).collect::<Vec<u64>>()).into(),
        Series::new("latitude".into(), estimates.iter().map(|e| e.latitude).collect::<Vec<f64>>()).into(),
        Series::new("longitude".into(), estimates.iter().map(|e| e.longitude).collect::<Vec<f64>>()).into(),
        Series::new(
            "estimate".into(),
            estimates
                .iter()
                .map(|e| e.estimate.is_finite().then_some(e.estimate))
                .collect::<Vec<Option<f64>>>(),
        )
        .into(),
    ])
}

pub fn importance_frame(rows: &[ImportanceRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            "covariate_name".into(),
            rows.iter().map(|r| r.covariate.as_str()).collect::<Vec<&str>>(),
        )
        .into(),
        Series::new("score".into(), rows.iter().map(|r| r.score).collect::<Vec<f64>>()).into(),
    ])
}

pub fn partial_dependence_frame(rows: &[PdRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            "covariate_name".into(),
            rows.iter().map(|r| r.covariate.as_str()).collect::<Vec<&str>>(),
        )
        .into(),
        Series::new("value".into(), rows.iter().map(|r| r.value).collect::<Vec<f64>>()).into(),
        Series::new(
            "average_response".into(),
            rows.iter().map(|r| r.average_response).collect::<Vec<f64>>(),
        )
        .into(),
    ])
}

/// Write a frame as CSV, or Parquet for a `.parquet` path.
pub fn write_table(df: &mut DataFrame, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    let file = fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;

    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("parquet"));
    if is_parquet {
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Zstd(None))
            .finish(df)
            .with_context(|| format!("Failed to write parquet {:?}", path))?;
    } else {
        CsvWriter::new(file)
            .include_header(true)
            .finish(df)
            .with_context(|| format!("Failed to write CSV {:?}", path))?;
    }
    tracing::debug!("Wrote {} rows to {:?}", df.height(), path);
    Ok(())
}

pub fn write_summary(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialise run summary")?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

/// Write the four outputs into `dir`: `report.json`, `predictions.csv`,
/// `importance.csv` and `partial_dependence.csv`.
pub fn write_all(outputs: &PipelineOutputs, dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {:?}", dir))?;

    write_summary(&RunSummary::from(outputs), &dir.join("report.json"))?;
    write_table(&mut predictions_frame(&outputs.surface.estimates)?, &dir.join("predictions.csv"))?;
    write_table(&mut importance_frame(&outputs.importance)?, &dir.join("importance.csv"))?;
    write_table(
        &mut partial_dependence_frame(&outputs.partial_dependence)?,
        &dir.join("partial_dependence.csv"),
    )?;

    tracing::info!("Wrote outputs to {:?}", dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            ImportanceRow {
                covariate: "pland_04".to_string(),
                score: 2.5,
            },
            ImportanceRow {
                covariate: "duration_minutes".to_string(),
                score: 1.0,
            },
        ];
        let path = dir.path().join("importance.csv");
        write_table(&mut importance_frame(&rows).unwrap(), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("covariate_name,score"));
        assert_eq!(lines.next(), Some("pland_04,2.5"));
        let last = lines.next().unwrap();
        assert!(last.starts_with("duration_minutes,1"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_missing_estimates_are_written_as_null() {
        let estimates = vec![
            CellEstimate {
                id: 1,
                latitude: 42.0,
                longitude: -76.0,
                estimate: 0.5,
            },
            CellEstimate {
                id: 2,
                latitude: 42.0,
                longitude: -76.1,
                estimate: f64::NAN,
            },
        ];
        let mut df = predictions_frame(&estimates).unwrap();
        assert_eq!(df.column("estimate").unwrap().null_count(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        write_table(&mut df, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.to_lowercase().contains("nan"));
        let last = text.lines().last().unwrap();
        assert!(last.starts_with("2,") && last.ends_with(','), "row {:?}", last);
    }

    #[test]
    fn test_prediction_frame_shape() {
        let estimates = vec![
            CellEstimate {
                id: 7,
                latitude: 42.1,
                longitude: -76.2,
                estimate: 0.25,
            };
            3
        ];
        let df = predictions_frame(&estimates).unwrap();
        assert_eq!(df.shape(), (3, 4));
        assert_eq!(
            df.get_column_names().iter().map(|n| n.as_str()).collect::<Vec<_>>(),
            vec!["id", "latitude", "longitude", "estimate"]
        );
    }
}
