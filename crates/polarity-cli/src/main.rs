use anyhow::Result;
use clap::ArgMatches;
use log::LevelFilter;
use std::path::PathBuf;

use polarity_classifiers::config::DEFAULT_SAVE_DIR;
use polarity_cli::cli::build_cli;
use polarity_cli::input::{PredictConfig, TrainConfig};
use polarity_cli::predict::{run_prediction, run_reset};
use polarity_cli::train::run_training;

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("POLARITY_LOG", "error,polarity=info"))
        .init();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("train", sub_m)) => handle_train(sub_m),
        Some(("predict", sub_m)) => handle_predict(sub_m),
        Some(("reset", sub_m)) => handle_reset(sub_m),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn handle_train(matches: &ArgMatches) -> Result<()> {
    let config_path: Option<&PathBuf> = matches.get_one("config");
    match config_path {
        Some(path) => log::info!("[Polarity::Train] Training from config: {:?}", path),
        None => {
            let default_json =
                serde_json::to_string_pretty(&TrainConfig::default()).unwrap_or_default();
            eprintln!(
                "[Polarity::Train] No config provided; using defaults:\n{}",
                default_json
            );
        }
    }

    let config = match TrainConfig::from_arguments(config_path, matches) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid training configuration: {:#}", e);
            std::process::exit(2)
        }
    };

    match run_training(&config) {
        Ok(summary) => {
            let failed = summary.failed();
            for job in &failed {
                log::error!("{} failed: {}", job.model_type, job.detail);
            }
            println!("{}", serde_json::to_string_pretty(&summary.jobs)?);
            if !failed.is_empty() {
                std::process::exit(1)
            }
            Ok(())
        }
        Err(e) => {
            log::error!("Training failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_predict(matches: &ArgMatches) -> Result<()> {
    let config_path: Option<&PathBuf> = matches.get_one("config");
    let config = match PredictConfig::from_arguments(config_path, matches) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid prediction request: {:#}", e);
            std::process::exit(2)
        }
    };

    match run_prediction(&config) {
        Ok(prediction) => {
            println!("{}", serde_json::to_string_pretty(&prediction)?);
            Ok(())
        }
        Err(e) => {
            log::error!("Prediction failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_reset(matches: &ArgMatches) -> Result<()> {
    let save_dir = matches
        .get_one::<String>("save_dir")
        .map(String::as_str)
        .unwrap_or(DEFAULT_SAVE_DIR);
    match run_reset(save_dir) {
        Ok(()) => {
            eprintln!("[Polarity::Reset] Cleared {}", save_dir);
            Ok(())
        }
        Err(e) => {
            log::error!("Reset failed: {:#}", e);
            std::process::exit(1)
        }
    }
}
