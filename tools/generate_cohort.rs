//! Synthetic Cohort Generation Tool
//!
//! Generates a labeled CGM cohort and persists it for training.
//!
//! # Output
//!
//! - `features.csv` - one row per patient, canonical feature order, shuffled
//! - `sequences.npy` - `[N_patients, L]` float32 in generation order
//! - `seq_index.json` - patient id → sequence row
//! - `raw/<patient_id>.csv` - per-patient trace (`timestamp,code,value`)
//! - `generation_log.json` - counts, seed, threshold, timestamp
//!
//! # Usage
//!
//! ```bash
//! # Defaults (300 patients, seed 42) into data/synthetic
//! cargo run --release --bin generate_cohort -- --output data/synthetic
//!
//! # From TOML config
//! cargo run --release --bin generate_cohort -- --config configs/cohort.toml --output data/run1
//!
//! # Generate sample config
//! cargo run --release --bin generate_cohort -- --generate-config configs/cohort.toml
//! ```

use cgm_risk::{ExperimentMetadata, Pipeline, PipelineConfig};
use std::time::Instant;

const DEFAULT_OUTPUT: &str = "data/synthetic";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("generate_cohort");

    let mut config_path: Option<String> = None;
    let mut output = DEFAULT_OUTPUT.to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "--output" | "--generate-config" if i + 1 >= args.len() => {
                eprintln!("Error: {} requires a path argument", args[i]);
                std::process::exit(1);
            }
            "--config" => {
                config_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--output" => {
                output = args[i + 1].clone();
                i += 2;
            }
            "--generate-config" => {
                generate_sample_config(&args[i + 1]);
                return;
            }
            "--help" | "-h" => {
                print_usage(program);
                return;
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage(program);
                std::process::exit(1);
            }
        }
    }

    let config = match &config_path {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => {
                log::info!("Loaded configuration: {path}");
                config
            }
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };

    let pipeline = match Pipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Configuration validation failed: {e}");
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    match pipeline.generate(&output) {
        Ok(cohort) => {
            println!(
                "Generated {} patients ({} positive, {} without a placeable event) in {:.1}s",
                cohort.log.n_patients,
                cohort.log.positive_class_count,
                cohort.log.positives_without_event,
                start.elapsed().as_secs_f64()
            );
            println!("Output: {output}");
        }
        Err(e) => {
            eprintln!("Generation failed: {e}");
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!(
        r#"
Synthetic Cohort Generation Tool

Usage:
    {program} [--config <path>] [--output <dir>]   Generate a cohort (default output: {DEFAULT_OUTPUT})
    {program} --generate-config <path>             Write a sample TOML config
    {program} --help                               Show this help
"#
    );
}

fn generate_sample_config(path: &str) {
    let config = PipelineConfig::default().with_metadata(ExperimentMetadata {
        description: Some("Synthetic CGM cohort with injected glucose events".to_string()),
        tags: Some(vec!["synthetic".to_string(), "cgm".to_string()]),
        ..ExperimentMetadata::new("cgm-glucose-event")
    });

    let result = if path.ends_with(".json") {
        config.save_json(path)
    } else {
        config.save_toml(path)
    };
    match result {
        Ok(()) => println!("Generated sample config: {path}"),
        Err(e) => {
            eprintln!("Error generating config: {e}");
            std::process::exit(1);
        }
    }
}
