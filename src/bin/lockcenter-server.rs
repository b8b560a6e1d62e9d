use anyhow::Result;
use clap::Parser;
use lockcenter::{LockServer, ProtocolVersion};

#[derive(Parser)]
#[command(author, version)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:4000")]
    addr: String,
    /// `current` or `legacy`.
    #[arg(short, long, default_value = "current")]
    protocol: ProtocolVersion,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    log::info!("lockcenter-server {}", env!("CARGO_PKG_VERSION"));

    LockServer::bind(&args.addr, args.protocol)?.run()?;
    Ok(())
}
