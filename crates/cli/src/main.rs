//! txnlab CLI: run anomaly scenarios and inspect their traces.
//!
//! - `txnlab run <variant>`: execute a variant, print the trace and findings
//! - `txnlab list`: variant catalog with default parameters
//! - `txnlab matrix`: which isolation levels prevent which anomalies
//! - `txnlab init-config`: write a default `txnlab.toml`

mod commands;
mod format;
mod parse;

use std::path::{Path, PathBuf};
use std::process;

use tracing::Level;
use txnlab_core::Error;
use txnlab_detector::Detector;
use txnlab_engine::{EngineConfig, Simulator, CONFIG_FILE_NAME};

use commands::build_cli;
use format::{format_error, format_list, format_matrix, format_run, OutputMode};
use parse::{matches_to_action, CliAction};

fn main() {
    let matches = build_cli().get_matches();

    init_logging(matches.get_count("verbose"));

    let mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let action = match matches_to_action(&matches) {
        Ok(action) => action,
        Err(e) => {
            eprintln!("(error) {}", e);
            process::exit(2);
        }
    };

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    match execute(action, config_path.as_deref(), mode) {
        Ok(out) => {
            if !out.is_empty() {
                println!("{}", out);
            }
        }
        Err(e) => {
            eprintln!("{}", format_error(&e, mode));
            process::exit(1);
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Error> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => EngineConfig::load_or_default(Path::new(CONFIG_FILE_NAME)),
    }
}

fn execute(action: CliAction, config_path: Option<&Path>, mode: OutputMode) -> Result<String, Error> {
    match action {
        CliAction::Run {
            kind,
            t1,
            t2,
            interleaving,
            show_trace,
        } => {
            let simulator = Simulator::in_memory(load_config(config_path)?)?;
            let run = simulator.run_with(kind, t1, t2, interleaving)?;
            let report = Detector::new().analyze(&run);
            Ok(format_run(&run, &report, mode, show_trace))
        }
        CliAction::List => Ok(format_list(mode)),
        CliAction::Matrix => Ok(format_matrix(mode)),
        CliAction::InitConfig { path } => {
            let created = EngineConfig::write_default_if_missing(&path)?;
            Ok(match (created, mode) {
                (true, OutputMode::Human) => format!("wrote {}", path.display()),
                (false, OutputMode::Human) => format!("{} already exists, left unchanged", path.display()),
                (created, OutputMode::Json) => serde_json::json!({
                    "path": path.display().to_string(),
                    "created": created,
                })
                .to_string(),
            })
        }
    }
}
