mod config_commands;
mod message_commands;

use std::path::PathBuf;

use {
    anyhow::{Context, bail},
    clap::{Parser, Subcommand},
    switchyard::{Switchyard, Vars},
    tracing::{debug, info},
};

#[derive(Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Send and receive messages through configured switchyard connectors"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG", default_value = "switchyard.toml")]
    config: PathBuf,

    /// Variables file used to resolve `${name}` placeholders.
    #[arg(long, global = true, env = "SWITCHYARD_VARS")]
    vars: Option<PathBuf>,

    /// Extra placeholder variable as KEY=VALUE; wins over the variables file.
    #[arg(long = "var", global = true, value_name = "KEY=VALUE")]
    var: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message through a sender.
    Send(message_commands::SendArgs),
    /// Print messages arriving on a receiver until Ctrl-C.
    Receive(message_commands::ReceiveArgs),
    /// Load the configuration and list what it declares.
    Check,
}

/// Split a `KEY=VALUE` argument.
pub(crate) fn parse_pair(raw: &str) -> anyhow::Result<(String, String)> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => bail!("expected KEY=VALUE, got [{raw}]"),
    }
}

fn load_vars(cli: &Cli) -> anyhow::Result<Vars> {
    let mut vars = match &cli.vars {
        Some(path) => switchyard_config::load_vars_file(path)
            .with_context(|| format!("cannot load variables from {}", path.display()))?,
        None => Vars::new(),
    };
    for raw in &cli.var {
        let (k, v) = parse_pair(raw)?;
        vars.insert(k, v);
    }
    debug!(count = vars.len(), "placeholder variables loaded");
    Ok(vars)
}

async fn open_yard(cli: &Cli) -> anyhow::Result<Switchyard> {
    let vars = load_vars(cli)?;
    let tree = switchyard_config::load_tree(&cli.config)
        .with_context(|| format!("cannot load configuration from {}", cli.config.display()))?;

    let yard = Switchyard::new();
    switchyard_wsstomp::register(yard.registry());
    switchyard_amqp::register(yard.registry());
    yard.configure(tree, &vars, false).await?;
    Ok(yard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    switchyard::logging::init(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");

    let yard = open_yard(&cli).await?;
    let result = match cli.command {
        Commands::Send(args) => message_commands::send(&yard, args).await,
        Commands::Receive(args) => message_commands::receive(&yard, args).await,
        Commands::Check => config_commands::check(&yard),
    };
    yard.close().await;
    result
}
