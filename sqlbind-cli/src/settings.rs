//! Where the binary finds its `DB_*` settings
//!
//! `--config FILE` wins; otherwise `~/.sqlbind/config.toml` if it exists;
//! otherwise the process environment (after `.env` is loaded).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sqlbind_core::DbSettings;

/// `~/.sqlbind/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sqlbind").join("config.toml"))
}

pub fn load(explicit: Option<&Path>) -> Result<DbSettings> {
    load_from(explicit, default_config_path().as_deref())
}

fn load_from(explicit: Option<&Path>, default: Option<&Path>) -> Result<DbSettings> {
    if let Some(path) = explicit {
        tracing::debug!("Loading database settings from {}", path.display());
        return DbSettings::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    if let Some(path) = default.filter(|p| p.is_file()) {
        tracing::debug!("Loading database settings from {}", path.display());
        return DbSettings::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    tracing::debug!("No config file; reading DB_* from the environment");
    DbSettings::from_env().context("Invalid DB_* environment variables")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn explicit_file_wins_over_default() {
        let explicit = write_config("DB_HOST = \"explicit\"\n");
        let default = write_config("DB_HOST = \"default\"\n");

        let settings = load_from(Some(explicit.path()), Some(default.path())).unwrap();
        assert_eq!(settings.host.as_deref(), Some("explicit"));
    }

    #[test]
    fn default_file_used_when_present() {
        let default = write_config("DB_DSN = \"postgresql://db.internal/app\"\n");

        let settings = load_from(None, Some(default.path())).unwrap();
        assert_eq!(settings.dsn.as_deref(), Some("postgresql://db.internal/app"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_from(Some(&missing), None).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
