//! CLI argument surface for the `lmcrec` binary.

use std::env;
use std::path::PathBuf;

use clap::Parser;

use lmcrec::core::config::{CONFIG_ENV_VAR, CONFIG_FILE_DEFAULT};
use lmcrec::recorder::runner;

/// Telemetry recorder: polls a JSON status endpoint and appends the delta
/// stream to compact binary record files.
#[derive(Debug, Parser)]
#[command(name = "lmcrec", disable_version_flag = true)]
pub struct Cli {
    /// Config file (default from $LMCREC_CONFIG, fallback
    /// "lmcrec-config.yaml").
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Recorder INST; must match `inst` or `url` in the `recorders`
    /// section of the config. Mandatory.
    #[arg(short, long)]
    pub inst: Option<String>,

    /// Display version and exit.
    #[arg(long)]
    pub version: bool,
}

/// Dispatch the parsed arguments; returns the process exit code.
pub fn run(cli: &Cli) -> i32 {
    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return 0;
    }
    let Some(inst) = cli.inst.as_deref().filter(|inst| !inst.is_empty()) else {
        eprintln!("lmcrec: missing mandatory --inst INST");
        return 1;
    };
    let config_file = cli.config.clone().unwrap_or_else(|| {
        PathBuf::from(env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| CONFIG_FILE_DEFAULT.to_string()))
    });
    runner::run(&config_file, inst)
}
