//! # Sandbox Runner
//!
//! Main entry point for `sandbox-run`.

use sandbox_run::config::{DEFAULT_LOG_FILTER, ENV_LOG};
use sandbox_run::{log_filter, parse_args, run, usage, FileConfig, Invocation};
use std::env;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("sandbox-run");

    let mut config = match parse_args(args.get(1..).unwrap_or_default()) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            eprintln!("{}", usage(program));
            process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", usage(program));
            process::exit(1);
        }
    };

    let cli_log = config.log.clone();
    if let Some(path) = config.config_file.clone() {
        let applied = FileConfig::load(&path).and_then(|file| config.apply_file(file));
        if let Err(e) = applied {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }

    let env_log = env::var(ENV_LOG).ok();
    let filter = log_filter(cli_log.as_deref(), env_log.as_deref(), config.log.as_deref());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&config) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
