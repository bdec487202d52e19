//! Trace Scoring Tool
//!
//! Aggregates one raw trace CSV (`timestamp,code,value`), extracts its
//! trailing sequence and prints the ensemble's JSON response.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin score_trace -- --models models --trace data/synthetic/raw/synt_0001.csv
//! ```
//!
//! Prints either `{"risk_probability": .., "risk_label": ..}` or
//! `{"error": ".."}` when the models could not be loaded.

use cgm_risk::{
    EnsemblePredictor, FeatureAggregator, PipelineConfig, SequenceAnchor, SequenceExtractor, Trace,
};

const DEFAULT_MODELS: &str = "models";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("score_trace");

    let mut config_path: Option<String> = None;
    let mut model_dir = DEFAULT_MODELS.to_string();
    let mut trace_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage(program);
                return;
            }
            flag @ ("--config" | "--models" | "--trace") => {
                let Some(value) = args.get(i + 1).cloned() else {
                    eprintln!("Error: {flag} requires a path argument");
                    std::process::exit(1);
                };
                match flag {
                    "--config" => config_path = Some(value),
                    "--models" => model_dir = value,
                    _ => trace_path = Some(value),
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

    let Some(trace_path) = trace_path else {
        print_usage(program);
        std::process::exit(1);
    };

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

    let trace = match Trace::read_csv(&trace_path) {
        Ok(trace) => trace,
        Err(e) => {
            eprintln!("Failed to read trace {trace_path}: {e}");
            std::process::exit(1);
        }
    };

    let features = FeatureAggregator::new(config.features.clone()).aggregate(&trace);
    let sequence = SequenceExtractor::new(config.sequence.clone()).extract_trace(&trace, SequenceAnchor::TraceEnd);
    log::info!("Scoring {} samples from {trace_path}", trace.len());

    let predictor = EnsemblePredictor::from_dir(&model_dir);
    let response = predictor.predict(&features, &sequence);
    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to render response: {e}");
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!(
        r#"
Trace Scoring Tool

Usage:
    {program} --trace <raw.csv> [--models <dir>] [--config <path>]
    {program} --help
"#
    );
}
