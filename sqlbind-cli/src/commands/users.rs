//! Read users outside any HTTP request, through the adapter's own accessor

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sqlbind_core::{Executor, Model};
use sqlbind_server::models::User;
use sqlbind_server::{models, Database};

#[derive(Parser, Debug)]
pub struct UsersArgs {
    #[command(subcommand)]
    pub command: UsersCommand,

    /// TOML file with DB_* settings (default: ~/.sqlbind/config.toml, then environment)
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum UsersCommand {
    /// Print one user as JSON
    Get {
        /// User id
        id: i64,
    },
}

pub async fn run_users(args: UsersArgs) -> Result<()> {
    let settings = crate::settings::load(args.config.as_deref())?;
    let db = Database::with_metadata(settings, models::metadata(), false);
    db.startup().await.context("Failed to connect to the database")?;

    let result = match args.command {
        UsersCommand::Get { id } => {
            db.first_or_404(&User::query().filter_eq(User::PRIMARY_KEY, id))
                .await
                .with_context(|| format!("Failed to fetch user {id}"))
        }
    };
    db.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
