//! sc-action - Entry Point
//!
//! Runs one stack operation (deploy, provision, destroy or cancel) from a CI
//! runner and reports its progress to the configured chat channels.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use sc_action::app::options::{ActionEnv, ActionOptions};
use sc_action::app::run::{init, run, Command};
use sc_action::deploy::signal::OsSignals;
use sc_action::logs::init_logging;
use sc_action::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize version info: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    // Snapshot the environment once
    let action_env = Arc::new(ActionEnv::from_env());
    let options = ActionOptions::from_env(&action_env);

    // Initialize logging
    if let Err(e) = init_logging(options.logs.clone()) {
        println!("Failed to initialize logging: {e}");
    }

    let Some(operation) = cli_args.get("operation") else {
        error!("Missing --operation=<deploy|provision|destroy|cancel>");
        return ExitCode::from(2);
    };

    let command = match Command::parse(
        operation,
        cli_args.get("scope").map(String::as_str),
        &action_env,
    ) {
        Ok(command) => command,
        Err(e) => {
            error!("Invalid invocation: {}", e);
            return ExitCode::from(2);
        }
    };

    let services = match init(&options, action_env.clone(), Arc::new(OsSignals)) {
        Ok(services) => services,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = %version.version,
        git_hash = %version.git_hash,
        "Running sc-action in {}", options.workspace.display()
    );
    match run(&services, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("sc-action failed: {e}");
            ExitCode::FAILURE
        }
    }
}
