use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lockcenter::{ClientConfig, ConnectionMode, MutexClient, MutexService, ProtocolVersion};

#[derive(Parser, Debug)]
#[command(author, version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
struct CommandOpts {
    /// JSON client configuration; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    addr: Option<String>,
    /// `current` or `legacy`.
    #[arg(short, long)]
    protocol: Option<ProtocolVersion>,
    /// Keep one connection for all retries of an operation.
    #[arg(long)]
    keep_alive: bool,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Lock {
        key: String,
        /// Tag the lock with this source address.
        #[arg(short, long)]
        source: Option<String>,
        #[command(flatten)]
        opts: CommandOpts,
    },
    Unlock {
        key: String,
        #[command(flatten)]
        opts: CommandOpts,
    },
    /// Block until the key is free, without holding it.
    Wait {
        key: String,
        #[command(flatten)]
        opts: CommandOpts,
    },
    #[command(name = "reset-key")]
    ResetByKey {
        key: String,
        #[command(flatten)]
        opts: CommandOpts,
    },
    #[command(name = "reset-source")]
    ResetBySource {
        source: Option<String>,
        #[command(flatten)]
        opts: CommandOpts,
    },
}

impl Commands {
    fn opts(&self) -> &CommandOpts {
        match self {
            Commands::Lock { opts, .. }
            | Commands::Unlock { opts, .. }
            | Commands::Wait { opts, .. }
            | Commands::ResetByKey { opts, .. }
            | Commands::ResetBySource { opts, .. } => opts,
        }
    }
}

fn load_config(opts: &CommandOpts) -> Result<ClientConfig> {
    let mut config = match &opts.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(addr) = &opts.addr {
        config.addr = addr.clone();
    }
    if let Some(protocol) = opts.protocol {
        config.protocol = protocol;
    }
    if opts.keep_alive {
        config.connection_mode = ConnectionMode::PerOperation;
    }
    if opts.max_attempts.is_some() {
        config.retry.max_attempts = opts.max_attempts;
    }
    if opts.timeout_ms.is_some() {
        config.retry.timeout_ms = opts.timeout_ms;
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let client = MutexClient::new(load_config(cli.command.opts())?)?;

    match &cli.command {
        Commands::Lock { key, source, .. } => client.lock(key, source.as_deref())?,
        Commands::Unlock { key, .. } => client.unlock(key)?,
        Commands::Wait { key, .. } => client.wait(key)?,
        Commands::ResetByKey { key, .. } => client.reset_by_key(key)?,
        Commands::ResetBySource { source, .. } => client.reset_by_source(source.as_deref())?,
    }
    Ok(())
}
