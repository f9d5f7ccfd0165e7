//! Create or drop the demo tables

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sqlbind_server::{models, Database};

#[derive(Parser, Debug)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub command: SchemaCommand,

    /// TOML file with DB_* settings (default: ~/.sqlbind/config.toml, then environment)
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaCommand {
    /// CREATE TABLE IF NOT EXISTS for every registered table
    Create,
    /// DROP TABLE IF EXISTS for every registered table, in reverse order
    Drop,
}

pub async fn run_schema(args: SchemaArgs) -> Result<()> {
    let settings = crate::settings::load(args.config.as_deref())?;
    let db = Database::with_metadata(settings, models::metadata(), false);
    db.startup().await.context("Failed to connect to the database")?;

    let result = match args.command {
        SchemaCommand::Create => db.create_all().await,
        SchemaCommand::Drop => db.drop_all().await,
    };
    db.shutdown().await;

    result.context("Schema operation failed")?;
    println!("{}", db.metadata());
    Ok(())
}
