//! Request outbox daemon - replays queued HTTP requests when connectivity returns.

mod commands;
mod probe;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use request_outbox::{OutboxConfig, Paths};

/// Request outbox command-line interface.
#[derive(Parser)]
#[command(name = "request-outbox")]
#[command(about = "Durable outbox for HTTP requests made while offline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides config.json
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, snapshot and logs. Defaults to ~/.request-outbox
    #[arg(long, global = true, env = "REQUEST_OUTBOX_HOME")]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the outbox until interrupted
    Run,
    /// Add a request to the persisted queue
    Enqueue {
        /// Request id. Generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Request kind; outcomes are named <BASE_TYPE>_SUCCESS / <BASE_TYPE>_ERROR
        #[arg(long)]
        base_type: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "POST")]
        method: String,
        /// JSON body
        #[arg(long)]
        payload: Option<String>,
    },
    /// Print the persisted queue as JSON
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = OutboxConfig::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let command = cli.command.unwrap_or(Commands::Run);
    observability::init_with_config(observability::LogConfig {
        service_name: "request-outbox".into(),
        default_level: config.log_level.clone(),
        log_path: Some(paths.log_file()),
        also_stderr: matches!(command, Commands::Run),
    })?;

    match command {
        Commands::Run => {
            commands::run(config, paths).await?;
        }
        Commands::Enqueue {
            id,
            base_type,
            url,
            method,
            payload,
        } => {
            let id = commands::enqueue(
                &config,
                &paths,
                commands::EnqueueArgs {
                    id,
                    base_type,
                    url,
                    method,
                    payload,
                },
            )?;
            println!("{}", id);
        }
        Commands::List => {
            println!("{}", commands::list(&config, &paths)?);
        }
    }

    Ok(())
}
