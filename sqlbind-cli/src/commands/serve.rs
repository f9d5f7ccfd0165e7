//! Run the demo application over HTTP

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use sqlbind_server::{models, run_server, Database, ServerConfig};

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long, short = 'b', default_value = "127.0.0.1:8000", env = "SQLBIND_BIND")]
    pub bind: SocketAddr,

    /// TOML file with DB_* settings (default: ~/.sqlbind/config.toml, then environment)
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Create the demo tables at startup if they do not exist
    #[arg(long)]
    pub create_schema: bool,

    /// Cancel requests running longer than this many seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,
}

pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let settings = crate::settings::load(args.config.as_deref())?;
    let db = Database::with_metadata(settings, models::metadata(), args.create_schema);

    let config = ServerConfig {
        bind_addr: args.bind,
        request_timeout: Duration::from_secs(args.request_timeout),
    };

    tracing::info!("Starting sqlbind server on {}", config.bind_addr);
    run_server(db, config).await.context("Server error")?;
    Ok(())
}
