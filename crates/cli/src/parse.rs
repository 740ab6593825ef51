//! ArgMatches → CliAction conversion.

use std::path::PathBuf;

use clap::ArgMatches;
use txnlab_core::{Interleaving, RecordKey, ScenarioKind, TxnParams};
use txnlab_engine::CONFIG_FILE_NAME;

/// The result of parsing the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    /// Execute a variant and detect anomalies.
    Run {
        kind: ScenarioKind,
        t1: TxnParams,
        t2: TxnParams,
        interleaving: Interleaving,
        show_trace: bool,
    },
    /// Print the variant catalog.
    List,
    /// Print the isolation prevention matrix.
    Matrix,
    /// Write the default configuration file.
    InitConfig { path: PathBuf },
}

/// Convert parsed matches into an action.
pub fn matches_to_action(matches: &ArgMatches) -> Result<CliAction, String> {
    match matches.subcommand() {
        Some(("run", sub)) => parse_run(sub),
        Some(("list", _)) => Ok(CliAction::List),
        Some(("matrix", _)) => Ok(CliAction::Matrix),
        Some(("init-config", sub)) => Ok(CliAction::InitConfig {
            path: sub
                .get_one::<String>("path")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
        }),
        Some((other, _)) => Err(format!("unknown command '{}'", other)),
        None => Err("no command given".to_string()),
    }
}

fn parse_run(matches: &ArgMatches) -> Result<CliAction, String> {
    let variant = matches
        .get_one::<String>("variant")
        .ok_or_else(|| "missing variant".to_string())?;
    let kind: ScenarioKind = variant.parse().map_err(|e| format!("{}", e))?;
    let (mut t1, mut t2) = kind.default_params();

    if let Some(amount) = matches.get_one::<i64>("t1") {
        t1.amount = *amount;
    }
    if let Some(amount) = matches.get_one::<i64>("t2") {
        t2.amount = *amount;
    }
    if let Some(keys) = parse_keys(matches, "t1-keys")? {
        t1.keys = keys;
    }
    if let Some(keys) = parse_keys(matches, "t2-keys")? {
        t2.keys = keys;
    }

    let interleaving = if matches.get_flag("sequential") {
        Interleaving::Sequential
    } else {
        Interleaving::Concurrent
    };
    Ok(CliAction::Run {
        kind,
        t1,
        t2,
        interleaving,
        show_trace: !matches.get_flag("no-trace"),
    })
}

fn parse_keys(matches: &ArgMatches, id: &str) -> Result<Option<Vec<RecordKey>>, String> {
    let Some(raw) = matches.get_many::<String>(id) else {
        return Ok(None);
    };
    raw.map(|s| s.trim().parse::<RecordKey>().map_err(|e| format!("{}", e)))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
