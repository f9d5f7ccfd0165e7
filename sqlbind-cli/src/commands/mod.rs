//! Subcommand implementations for the sqlbind binary

pub mod schema;
pub mod serve;
pub mod users;

pub use schema::run_schema;
pub use serve::run_serve;
pub use users::run_users;
