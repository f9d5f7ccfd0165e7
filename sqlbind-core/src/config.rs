//! Database settings read from the application's configuration mapping.
//!
//! Keys follow the `DB_*` convention so the same mapping can come from a
//! TOML file, the process environment or an in-memory JSON object:
//!
//! ```toml
//! DB_HOST = "localhost"
//! DB_PORT = 5432
//! DB_USER = "postgres"
//! DB_SSL = "require"
//!
//! [DB_KWARGS]
//! max_inactive_connection_lifetime = 59.0
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::ConnectOptions;

use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";
const DEFAULT_DATABASE: &str = "postgres";
const DEFAULT_POOL_MIN_SIZE: u32 = 5;
const DEFAULT_POOL_MAX_SIZE: u32 = 10;

/// Prefix shared by every key this crate reads from the environment
pub const ENV_PREFIX: &str = "DB_";

/// Connection and pool settings.
///
/// Either `dsn` or `host` must be set. When both are present the DSN wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbSettings {
    #[serde(rename = "DB_DSN")]
    pub dsn: Option<String>,

    #[serde(rename = "DB_HOST")]
    pub host: Option<String>,

    #[serde(rename = "DB_PORT", deserialize_with = "flexible")]
    pub port: u16,

    #[serde(rename = "DB_USER")]
    pub user: String,

    #[serde(rename = "DB_PASSWORD")]
    pub password: String,

    #[serde(rename = "DB_DATABASE")]
    pub database: String,

    #[serde(rename = "DB_SSL")]
    pub ssl: Option<SslSettings>,

    #[serde(rename = "DB_KWARGS")]
    pub kwargs: PoolKwargs,

    #[serde(rename = "DB_POOL_MIN_SIZE", deserialize_with = "flexible")]
    pub pool_min_size: u32,

    #[serde(rename = "DB_POOL_MAX_SIZE", deserialize_with = "flexible")]
    pub pool_max_size: u32,

    /// Log every statement sqlx executes
    #[serde(rename = "DB_ECHO", deserialize_with = "flexible")]
    pub echo: bool,

    /// Install the per-request connection middleware
    #[serde(rename = "DB_USE_CONNECTION_FOR_REQUEST", deserialize_with = "flexible")]
    pub use_connection_for_request: bool,

    /// Open a fresh connection per request instead of borrowing from the pool
    #[serde(rename = "DB_DEDICATED_CONNECTION", deserialize_with = "flexible")]
    pub dedicated_connection: bool,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            dsn: None,
            host: None,
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            database: DEFAULT_DATABASE.to_string(),
            ssl: None,
            kwargs: PoolKwargs::default(),
            pool_min_size: DEFAULT_POOL_MIN_SIZE,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            echo: false,
            use_connection_for_request: true,
            dedicated_connection: false,
        }
    }
}

/// Extra pool constructor options (`DB_KWARGS`).
///
/// Durations are in seconds and may be fractional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolKwargs {
    /// Close connections that sat idle in the pool longer than this
    pub max_inactive_connection_lifetime: Option<f64>,
    /// Close connections older than this regardless of activity
    pub max_lifetime: Option<f64>,
    /// How long `acquire` waits for a free connection
    pub timeout: Option<f64>,
    /// Prepared statement cache size per connection
    pub statement_cache_size: Option<usize>,
    /// Ping connections before handing them out
    pub test_before_acquire: Option<bool>,
}

impl PoolKwargs {
    pub fn idle_timeout(&self) -> Result<Option<Duration>> {
        seconds("max_inactive_connection_lifetime", self.max_inactive_connection_lifetime)
    }

    pub fn max_lifetime(&self) -> Result<Option<Duration>> {
        seconds("max_lifetime", self.max_lifetime)
    }

    pub fn acquire_timeout(&self) -> Result<Option<Duration>> {
        seconds("timeout", self.timeout)
    }
}

fn seconds(key: &str, value: Option<f64>) -> Result<Option<Duration>> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|_| {
                Error::config(format!(
                    "DB_KWARGS.{key} must be a finite, non-negative number of seconds (got {secs})"
                ))
            })
        })
        .transpose()
}

/// TLS mode for the connection, mirroring libpq's `sslmode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow => PgSslMode::Allow,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// `DB_SSL`: a mode string, a boolean, or `{ mode, root_cert }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SslRepr")]
pub struct SslSettings {
    pub mode: SslMode,
    pub root_cert: Option<PathBuf>,
}

impl SslSettings {
    pub fn new(mode: SslMode) -> Self {
        Self {
            mode,
            root_cert: None,
        }
    }

    pub fn with_root_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_cert = Some(path.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SslRepr {
    Flag(bool),
    Mode(SslMode),
    Full {
        mode: SslMode,
        #[serde(default)]
        root_cert: Option<PathBuf>,
    },
}

impl From<SslRepr> for SslSettings {
    fn from(repr: SslRepr) -> Self {
        match repr {
            SslRepr::Flag(true) => Self::new(SslMode::Require),
            SslRepr::Flag(false) => Self::new(SslMode::Disable),
            SslRepr::Mode(mode) => Self::new(mode),
            SslRepr::Full { mode, root_cert } => Self { mode, root_cert },
        }
    }
}

/// Accept either the native type or its string form (environment values are
/// always strings).
fn flexible<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex<T> {
        Native(T),
        Text(String),
    }

    match Flex::<T>::deserialize(deserializer)? {
        Flex::Native(value) => Ok(value),
        Flex::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

/// Where the engine connects, without credentials. Used for logs and errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ConnectTarget {
    pub(crate) fn from_options(options: &PgConnectOptions) -> Self {
        Self {
            user: options.get_username().to_string(),
            host: options.get_host().to_string(),
            port: options.get_port(),
            database: options.get_database().unwrap_or(DEFAULT_DATABASE).to_string(),
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl DbSettings {
    /// Settings that connect through a full connection string
    pub fn from_dsn(dsn: impl Into<String>) -> Self {
        Self {
            dsn: Some(dsn.into()),
            ..Self::default()
        }
    }

    /// Settings built from discrete connection fields
    pub fn from_parts(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_ssl(mut self, ssl: SslSettings) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn with_kwargs(mut self, kwargs: PoolKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.pool_min_size = min;
        self.pool_max_size = max;
        self
    }

    pub fn with_dedicated_connection(mut self, dedicated: bool) -> Self {
        self.dedicated_connection = dedicated;
        self
    }

    /// Deserialize from a string-keyed mapping. Keys without the `DB_`
    /// prefix are ignored so a whole application config can be passed in.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let relevant: Map<String, Value> = map
            .iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let settings: Self = serde_json::from_value(Value::Object(relevant))
            .map_err(|e| Error::config(format!("invalid database settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read `DB_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from `(key, value)` string pairs, as found in the environment.
    ///
    /// `DB_KWARGS` and `DB_SSL` may carry a JSON object; every other value is
    /// taken verbatim.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = Map::new();
        for (key, value) in vars {
            let key = key.into();
            if !key.starts_with(ENV_PREFIX) {
                continue;
            }
            let value = value.into();
            let structured = matches!(key.as_str(), "DB_KWARGS" | "DB_SSL");
            let parsed = if structured && value.trim_start().starts_with('{') {
                serde_json::from_str(&value)
                    .map_err(|e| Error::config(format!("{key} is not valid JSON: {e}")))?
            } else if key == "DB_SSL" && matches!(value.trim(), "true" | "false") {
                Value::Bool(value.trim() == "true")
            } else {
                Value::String(value)
            };
            map.insert(key, parsed);
        }
        Self::from_map(&map)
    }

    /// Parse a TOML document whose top-level keys are the `DB_*` settings
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(source)
            .map_err(|e| Error::config(format!("invalid TOML: {e}")))?;
        let value = serde_json::to_value(table)
            .map_err(|e| Error::config(format!("invalid TOML: {e}")))?;

        match value {
            Value::Object(map) => Self::from_map(&map),
            _ => Err(Error::config("settings file must be a table")),
        }
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Check that the required connection fields are present and the pool
    /// options are coherent.
    pub fn validate(&self) -> Result<()> {
        let has_dsn = self.dsn.as_deref().is_some_and(|dsn| !dsn.trim().is_empty());
        let has_host = self.host.as_deref().is_some_and(|host| !host.trim().is_empty());
        if !has_dsn && !has_host {
            return Err(Error::config("either DB_DSN or DB_HOST must be set"));
        }

        if self.pool_max_size == 0 {
            return Err(Error::config("DB_POOL_MAX_SIZE must be at least 1"));
        }
        if self.pool_min_size > self.pool_max_size {
            return Err(Error::config(format!(
                "DB_POOL_MIN_SIZE ({}) exceeds DB_POOL_MAX_SIZE ({})",
                self.pool_min_size, self.pool_max_size
            )));
        }

        self.kwargs.idle_timeout()?;
        self.kwargs.max_lifetime()?;
        self.kwargs.acquire_timeout()?;
        Ok(())
    }

    /// Resolve the sqlx connect options.
    ///
    /// A DSN takes precedence over discrete fields; `DB_SSL` is applied on
    /// top of either and overrides any `sslmode` in the DSN.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        self.validate()?;

        let mut options = match self.dsn.as_deref().filter(|dsn| !dsn.trim().is_empty()) {
            Some(dsn) => {
                if self.host.is_some() {
                    tracing::warn!("DB_DSN is set; ignoring DB_HOST/DB_PORT/DB_USER/DB_PASSWORD/DB_DATABASE");
                }
                PgConnectOptions::from_str(dsn)
                    .map_err(|e| Error::config(format!("invalid DB_DSN: {e}")))?
            }
            None => {
                let host = self.host.as_deref().unwrap_or_default();
                PgConnectOptions::new_without_pgpass()
                    .host(host)
                    .port(self.port)
                    .username(&self.user)
                    .password(&self.password)
                    .database(&self.database)
            }
        };

        if let Some(ssl) = &self.ssl {
            options = options.ssl_mode(ssl.mode.into());
            if let Some(root_cert) = &ssl.root_cert {
                options = options.ssl_root_cert(root_cert);
            }
        }

        if let Some(capacity) = self.kwargs.statement_cache_size {
            options = options.statement_cache_capacity(capacity);
        }

        if !self.echo {
            options = options.disable_statement_logging();
        }

        Ok(options)
    }

    /// Password-free description of where these settings connect
    pub fn target(&self) -> Result<ConnectTarget> {
        Ok(ConnectTarget::from_options(&self.connect_options()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn discrete_fields_with_defaults() {
        let settings = DbSettings::from_map(&map(json!({
            "DB_HOST": "db.internal",
            "DB_PASSWORD": "secret",
            "APP_NAME": "ignored",
        })))
        .unwrap();

        assert_eq!(settings.host.as_deref(), Some("db.internal"));
        assert_eq!(settings.port, 5432);
        assert_eq!(settings.user, "postgres");
        assert_eq!(settings.database, "postgres");
        assert_eq!(settings.pool_min_size, 5);
        assert_eq!(settings.pool_max_size, 10);
        assert!(settings.use_connection_for_request);
        assert!(!settings.dedicated_connection);

        let target = settings.target().unwrap();
        assert_eq!(target.to_string(), "postgres@db.internal:5432/postgres");
        assert!(!target.to_string().contains("secret"));
    }

    #[test]
    fn port_accepts_numeric_string() {
        let settings = DbSettings::from_map(&map(json!({
            "DB_HOST": "localhost",
            "DB_PORT": "6543",
        })))
        .unwrap();
        assert_eq!(settings.port, 6543);
    }

    #[test]
    fn missing_connection_fields_is_config_error() {
        let err = DbSettings::from_map(&map(json!({ "DB_USER": "app" }))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("DB_DSN or DB_HOST"));

        let err = DbSettings::from_map(&map(json!({ "DB_DSN": "  " }))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn dsn_wins_over_discrete_fields() {
        let settings = DbSettings::from_map(&map(json!({
            "DB_DSN": "postgresql://alice:pw@dsn-host:6000/appdb",
            "DB_HOST": "other-host",
            "DB_USER": "bob",
        })))
        .unwrap();

        let target = settings.target().unwrap();
        assert_eq!(target.host, "dsn-host");
        assert_eq!(target.port, 6000);
        assert_eq!(target.user, "alice");
        assert_eq!(target.database, "appdb");
    }

    #[test]
    fn ssl_overrides_dsn_sslmode() {
        let settings = DbSettings::from_dsn("postgresql://u@h/db?sslmode=disable")
            .with_ssl(SslSettings::new(SslMode::Require));
        let options = settings.connect_options().unwrap();
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn ssl_accepts_string_bool_and_table() {
        let settings = DbSettings::from_map(&map(json!({
            "DB_HOST": "h",
            "DB_SSL": "verify-full",
        })))
        .unwrap();
        assert_eq!(settings.ssl, Some(SslSettings::new(SslMode::VerifyFull)));

        let settings = DbSettings::from_map(&map(json!({ "DB_HOST": "h", "DB_SSL": true }))).unwrap();
        assert_eq!(settings.ssl.map(|s| s.mode), Some(SslMode::Require));

        let settings = DbSettings::from_map(&map(json!({
            "DB_HOST": "h",
            "DB_SSL": { "mode": "verify-ca", "root_cert": "/etc/ssl/root.crt" },
        })))
        .unwrap();
        assert_eq!(
            settings.ssl,
            Some(SslSettings::new(SslMode::VerifyCa).with_root_cert("/etc/ssl/root.crt"))
        );
    }

    #[test]
    fn kwargs_parse_and_reject_unknown_keys() {
        let settings = DbSettings::from_map(&map(json!({
            "DB_HOST": "h",
            "DB_KWARGS": { "max_inactive_connection_lifetime": 59.0, "timeout": 2.5 },
        })))
        .unwrap();
        assert_eq!(
            settings.kwargs.idle_timeout().unwrap(),
            Some(Duration::from_secs(59))
        );
        assert_eq!(
            settings.kwargs.acquire_timeout().unwrap(),
            Some(Duration::from_millis(2500))
        );

        let err = DbSettings::from_map(&map(json!({
            "DB_HOST": "h",
            "DB_KWARGS": { "max_queries": 100 },
        })))
        .unwrap_err();
        assert!(err.to_string().contains("max_queries"));
    }

    #[test]
    fn negative_duration_rejected() {
        let settings = DbSettings::from_parts("h", 5432, "u", "", "d").with_kwargs(PoolKwargs {
            max_inactive_connection_lifetime: Some(-1.0),
            ..PoolKwargs::default()
        });
        assert!(matches!(settings.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn pool_size_bounds() {
        let settings = DbSettings::from_parts("h", 5432, "u", "", "d").with_pool_size(20, 10);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("DB_POOL_MIN_SIZE"));

        let settings = DbSettings::from_parts("h", 5432, "u", "", "d").with_pool_size(0, 0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn from_vars_reads_strings_and_json() {
        let settings = DbSettings::from_vars([
            ("DB_HOST", "localhost"),
            ("DB_PORT", "5433"),
            ("DB_ECHO", "true"),
            ("DB_USE_CONNECTION_FOR_REQUEST", "false"),
            ("DB_KWARGS", r#"{"max_inactive_connection_lifetime": 59.0}"#),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(settings.port, 5433);
        assert!(settings.echo);
        assert!(!settings.use_connection_for_request);
        assert_eq!(settings.kwargs.max_inactive_connection_lifetime, Some(59.0));
    }

    #[test]
    fn from_vars_keeps_brace_passwords_verbatim() {
        let settings =
            DbSettings::from_vars([("DB_HOST", "h"), ("DB_PASSWORD", "{s3cret")]).unwrap();
        assert_eq!(settings.password, "{s3cret");

        let settings =
            DbSettings::from_vars([("DB_HOST", "h"), ("DB_PASSWORD", r#"{"a":1}"#)]).unwrap();
        assert_eq!(settings.password, r#"{"a":1}"#);
    }

    #[test]
    fn from_vars_ssl_table() {
        let settings = DbSettings::from_vars([
            ("DB_HOST", "h"),
            ("DB_SSL", r#"{"mode": "verify-full"}"#),
        ])
        .unwrap();
        assert_eq!(settings.ssl, Some(SslSettings::new(SslMode::VerifyFull)));
    }

    #[test]
    fn from_vars_ssl_flag() {
        let settings = DbSettings::from_vars([("DB_HOST", "h"), ("DB_SSL", "true")]).unwrap();
        assert_eq!(settings.ssl.map(|s| s.mode), Some(SslMode::Require));
    }

    #[test]
    fn from_vars_rejects_bad_bool() {
        let err = DbSettings::from_vars([("DB_HOST", "h"), ("DB_ECHO", "sometimes")]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn toml_document() {
        let settings = DbSettings::from_toml_str(
            r#"
            DB_HOST = "localhost"
            DB_PORT = 5432
            DB_POOL_MAX_SIZE = 4
            DB_POOL_MIN_SIZE = 1

            [DB_KWARGS]
            max_inactive_connection_lifetime = 59.0
            "#,
        )
        .unwrap();

        assert_eq!(settings.pool_max_size, 4);
        assert_eq!(settings.kwargs.max_inactive_connection_lifetime, Some(59.0));
    }
}
