use anyhow::{Context, Result};
use std::sync::Arc;
use toolwright_app::commands::{checkpoints, health, run};
use toolwright_app::config::Config;
use toolwright_app::prompt::TerminalConfirmationHandler;
use toolwright_app::{logging, Runtime};

const USAGE: &str = "\
Usage: toolwright <command>

Commands:
  health                      Show tools, trust and checkpoint status
  run <tool> [json-params]    Run one tool call (namespace::name for namespaced tools)
  checkpoints                 List checkpoints
  checkpoint <description>    Snapshot the workspace
  restore <id>                Restore a checkpoint
  untrust <tool>              Forget a permanent approval";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = Config::load().context("Failed to load configuration")?;
    logging::init(&config.logging.filter);

    let runtime = Runtime::start(config, Some(Arc::new(TerminalConfirmationHandler))).await?;

    let result = match (command, args.get(1)) {
        ("health", _) => health::run(&runtime),
        ("run", Some(tool)) => run::run(&runtime, tool, args.get(2).map(String::as_str)).await,
        ("checkpoints", _) => checkpoints::list(&runtime),
        ("checkpoint", Some(description)) => checkpoints::create(&runtime, description).await,
        ("restore", Some(id)) => checkpoints::restore(&runtime, id).await,
        ("untrust", Some(tool)) => {
            if runtime.confirmation.remove_trusted(tool, None) {
                println!("{tool} will ask again");
            } else {
                println!("{tool} was not trusted");
            }
            Ok(())
        }
        _ => {
            println!("{USAGE}");
            Ok(())
        }
    };

    runtime.shutdown().await;
    result
}
