//! linkdeck CLI - real-time update client for the linkdeck dashboard.

use clap::Parser;
use linkdeck::cli::{Cli, Commands, ConfigCommands};
use linkdeck::commands::{self, print as output};
use linkdeck::config::{OutputFormat, resolve_config};
use std::process;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "LINKDECK_LOG";

/// Filter used when `LINKDECK_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "linkdeck=info";

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let human = cli.human_readable;
    if let Err(e) = run_command(cli) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Install the stderr subscriber. Stdout is reserved for command output.
fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("warning: logging disabled: {}", e);
    }
}

fn run_command(cli: Cli) -> Result<(), linkdeck::Error> {
    let overrides = cli.overrides();
    let human_flag = cli.human_readable;

    match cli.command {
        Commands::Watch {
            server,
            poll,
            no_realtime,
            tags,
        } => {
            let mut overrides = server.apply(overrides);
            if let Some(secs) = poll {
                overrides = overrides.with_poll_interval(secs);
            }
            if no_realtime {
                overrides = overrides.with_realtime(false);
            }
            if !tags.is_empty() {
                overrides = overrides.with_tags(tags);
            }
            let config = resolve_config(&overrides)?;
            let human = is_human(config.output_format());

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::watch(&config, human))
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show { server } => {
                let config = resolve_config(&server.apply(overrides))?;
                let human = is_human(config.output_format());
                output(&commands::config_show(config)?, human);
                Ok(())
            }
            ConfigCommands::Path => {
                output(&commands::config_path(), human_flag);
                Ok(())
            }
            ConfigCommands::Init { server, force } => {
                output(&commands::config_init(server, force)?, human_flag);
                Ok(())
            }
        },
        Commands::Backoff { server, attempts } => {
            let config = resolve_config(&server.apply(overrides))?;
            let human = is_human(config.output_format());
            output(&commands::backoff(&config, attempts), human);
            Ok(())
        }
    }
}

fn is_human(format: &OutputFormat) -> bool {
    *format == OutputFormat::Human
}
