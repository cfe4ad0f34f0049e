//! Encounter-Rate Model Runner
//!
//! Usage:
//!   fit_encounter_model <checklists.{csv,parquet}> <prediction_grid.{csv,parquet}>
//!       [--config config.json] [--out output_dir] [--habitat col_a,col_b,...]
//!
//! Without `--habitat`, every checklist column that is not a known checklist
//! or effort field is treated as a habitat covariate.
//!
//! Output (in `--out`, default `encounter_rate_output/`):
//!   report.json, predictions.csv, importance.csv, partial_dependence.csv

use anyhow::Context;
use clap::Parser;
use encounter_rate_rust::{
    data, load_observations, load_prediction_grid, output, pipeline, HabitatSchema, PipelineConfig,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fit_encounter_model")]
#[command(about = "Fit an encounter-rate model and map it over a prediction grid", long_about = None)]
struct Cli {
    /// Checklist table (CSV or Parquet)
    checklists: PathBuf,

    /// Prediction grid table (CSV or Parquet)
    prediction_grid: PathBuf,

    /// Pipeline config JSON; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "encounter_rate_output")]
    out: PathBuf,

    /// Habitat covariate columns, comma-separated
    #[arg(long, value_delimiter = ',')]
    habitat: Option<Vec<String>>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "encounter_rate_rust=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Cli::parse();
    let total_start = Instant::now();

    println!("\n{}", "=".repeat(80));
    println!("ENCOUNTER RATE MODEL");
    println!("{}", "=".repeat(80));

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let habitat_columns = match args.habitat {
        Some(columns) => columns,
        None => data::infer_habitat_columns(&args.checklists)?,
    };
    let schema = HabitatSchema::new(habitat_columns.as_slice())?;
    println!("\nHabitat covariates ({}): {}", schema.len(), schema.names().join(", "));

    println!("\nLoading data...");
    let observations = load_observations(&args.checklists, &schema)?;
    let cells = load_prediction_grid(&args.prediction_grid, &schema)?;
    println!("  Checklists:       {}", observations.len());
    println!("  Prediction cells: {}", cells.len());

    println!("\n{}", "=".repeat(80));
    println!("FITTING");
    println!("{}", "=".repeat(80));
    let outputs = pipeline::run(&config, &schema, &observations, &cells)?;

    let counts = outputs.counts;
    println!("\nSubsampled: {} -> {}", counts.input, counts.subsampled);
    println!("Train / test: {} / {}", counts.train, counts.test);
    println!(
        "Forest: {} trees, {} draws per class",
        outputs.forest.n_trees(),
        outputs.forest.per_class_draws()
    );

    let record = outputs.record();
    println!("\n{}", "=".repeat(80));
    println!("HELD-OUT PERFORMANCE");
    println!("{}", "=".repeat(80));
    println!("{:<14} {:>10} {:>12}", "", "raw", "calibrated");
    println!("{:<14} {:>10.4} {:>12.4}", "MSE", record.mse_raw, record.mse_calibrated);
    println!(
        "{:<14} {:>10.2} {:>12.2}",
        "Threshold", record.threshold_raw, record.threshold_calibrated
    );
    println!("{:<14} {:>10.3} {:>12.3}", "AUC", outputs.report.raw.auc, record.auc);
    println!("{:<14} {:>10.3} {:>12.3}", "Kappa", outputs.report.raw.kappa, record.kappa);
    println!(
        "{:<14} {:>10.3} {:>12.3}",
        "Sensitivity", outputs.report.raw.sensitivity, record.sensitivity
    );
    println!(
        "{:<14} {:>10.3} {:>12.3}",
        "Specificity", outputs.report.raw.specificity, record.specificity
    );

    println!("\nTop covariates:");
    for row in outputs.importance.iter().take(5) {
        println!("  {:<28} {:.4}", row.covariate, row.score);
    }
    match outputs.peak {
        Some(peak) => println!("\nPeak time of day: {:.2} h", peak.hour),
        None => println!(
            "\nNo time-of-day covariate; standard checklist starts at {:.2} h",
            outputs.standard_observation.time_observations_started
        ),
    }

    output::write_all(&outputs, &args.out)
        .with_context(|| format!("Failed to write outputs to {:?}", args.out))?;

    println!("\n{}", "=".repeat(80));
    println!("COMPLETE");
    println!("{}", "=".repeat(80));
    println!("\nOutputs: {}", args.out.display());
    println!("Total time: {:.1}s", total_start.elapsed().as_secs_f64());

    Ok(())
}
