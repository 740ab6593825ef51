//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

use txnlab_core::ScenarioKind;

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("txnlab")
        .about("Reproduce transaction concurrency anomalies and detect them in the trace")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .help("Configuration file (default: ./txnlab.toml if present)")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("JSON output mode")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Log verbosity (-v info, -vv debug, -vvv trace)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(build_run())
        .subcommand(build_list())
        .subcommand(build_matrix())
        .subcommand(build_init_config())
}

fn build_run() -> Command {
    let variants: Vec<&'static str> = ScenarioKind::ALL.iter().map(|k| k.as_str()).collect();
    Command::new("run")
        .about("Execute one scenario variant and report its anomalies")
        .arg(
            Arg::new("variant")
                .required(true)
                .value_name("VARIANT")
                .help(format!("Scenario variant ({})", variants.join(", "))),
        )
        .arg(
            Arg::new("t1")
                .long("t1")
                .value_name("AMOUNT")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64))
                .help("Amount applied by T1 (default depends on the variant)"),
        )
        .arg(
            Arg::new("t2")
                .long("t2")
                .value_name("AMOUNT")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64))
                .help("Amount applied by T2 (default depends on the variant)"),
        )
        .arg(
            Arg::new("t1-keys")
                .long("t1-keys")
                .value_name("KEY,...")
                .value_delimiter(',')
                .help("Keys touched by T1, in access order (e.g. accounts:A,accounts:B)"),
        )
        .arg(
            Arg::new("t2-keys")
                .long("t2-keys")
                .value_name("KEY,...")
                .value_delimiter(',')
                .help("Keys touched by T2, in access order"),
        )
        .arg(
            Arg::new("sequential")
                .long("sequential")
                .help("Run T1 to completion before T2 (no interleaving)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-trace")
                .long("no-trace")
                .help("Omit the event trace from human output")
                .action(ArgAction::SetTrue),
        )
}

fn build_list() -> Command {
    Command::new("list").about("List scenario variants with their isolation level and parameters")
}

fn build_matrix() -> Command {
    Command::new("matrix").about("Show which isolation levels prevent which anomalies")
}

fn build_init_config() -> Command {
    Command::new("init-config")
        .about("Write a default configuration file")
        .arg(
            Arg::new("path")
                .value_name("PATH")
                .help("Destination (default: ./txnlab.toml)"),
        )
}
