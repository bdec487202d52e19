//! Ensemble Training Tool
//!
//! Trains the stacking ensemble on a persisted cohort and publishes the
//! model bundle together with `evaluation.json` and `explanation.json`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin train_ensemble -- --data data/synthetic --models models
//! cargo run --release --bin train_ensemble -- --config configs/cohort.toml --data data/run1 --models models/run1
//! ```

use cgm_risk::{Pipeline, PipelineConfig};
use std::time::Instant;

const DEFAULT_DATA: &str = "data/synthetic";
const DEFAULT_MODELS: &str = "models";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("train_ensemble");

    let mut config_path: Option<String> = None;
    let mut data_dir = DEFAULT_DATA.to_string();
    let mut model_dir = DEFAULT_MODELS.to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage(program);
                return;
            }
            flag @ ("--config" | "--data" | "--models") => {
                let Some(value) = args.get(i + 1).cloned() else {
                    eprintln!("Error: {flag} requires a path argument");
                    std::process::exit(1);
                };
                match flag {
                    "--config" => config_path = Some(value),
                    "--data" => data_dir = value,
                    _ => model_dir = value,
                }
                i += 2;
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
            Ok(config) => config,
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
    let outcome = match pipeline.train(&data_dir, &model_dir) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Training failed: {e}");
            std::process::exit(1);
        }
    };

    let auc = |v: Option<f64>| v.map(|a| format!("{a:.4}")).unwrap_or_else(|| "n/a".to_string());
    println!("Training finished in {:.1}s", start.elapsed().as_secs_f64());
    println!("  logistic AUC: {}", auc(outcome.evaluation.logistic.roc_auc));
    println!("  lstm AUC:     {}", auc(outcome.evaluation.lstm.roc_auc));
    println!("  ensemble AUC: {}", auc(outcome.evaluation.ensemble.roc_auc));
    println!("Artifacts: {model_dir}");
}

fn print_usage(program: &str) {
    eprintln!(
        r#"
Ensemble Training Tool

Usage:
    {program} [--config <path>] [--data <dir>] [--models <dir>]
    {program} --help

Defaults: --data {DEFAULT_DATA} --models {DEFAULT_MODELS}
"#
    );
}
