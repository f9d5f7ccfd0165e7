//! sqlbind CLI
//!
//! Serves the demo users application with a per-request database connection
//! and manages its schema:
//! - `serve`: bind the pool, run the HTTP server, close the pool on shutdown
//! - `schema create|drop`: create or drop the registered tables
//! - `users get <id>`: read one user through the adapter outside a request

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod settings;
mod tracing_setup;

use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(
    name = "sqlbind",
    author,
    version,
    about = "Bind a PostgreSQL pool to an axum application's lifecycle",
    long_about = "Opens the connection pool at startup, leases one connection to every request \
                  and closes the pool at shutdown. Settings come from DB_* keys in a TOML file \
                  or the environment."
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP (requires the `telemetry` feature)
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve(commands::serve::ServeArgs),
    /// Create or drop the demo tables
    Schema(commands::schema::SchemaArgs),
    /// Read users through the bound engine
    Users(commands::users::UsersArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    tracing_setup::init(&TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
    })?;

    let result = match cli.command {
        Commands::Serve(args) => commands::run_serve(args).await,
        Commands::Schema(args) => commands::run_schema(args).await,
        Commands::Users(args) => commands::run_users(args).await,
    };

    tracing_setup::shutdown_otel();
    result
}
