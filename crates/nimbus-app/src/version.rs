//! Application version record and database server version checks

use crate::database::Database;
use chrono::Utc;
use nimbus_config::Dialect;
use nimbus_core::{Error, Result};
use semver::{Version, VersionReq};
use serde_json::{json, Value};
use std::sync::Arc;

/// Version of the platform this crate belongs to
pub const PLATFORM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Collection holding the installed version
pub const VERSION_COLLECTION: &str = "applicationVersion";

const VERSION_KEY: &str = "version";

/// Platform version persisted in an application's database
#[derive(Debug, Clone)]
pub struct ApplicationVersion {
    db: Arc<dyn Database>,
}

impl ApplicationVersion {
    /// Wrap a database handle
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Installed version, if recorded
    pub async fn get(&self) -> Result<Option<String>> {
        let record = self.db.read_record(VERSION_COLLECTION, VERSION_KEY).await?;
        Ok(record.and_then(|value| {
            value
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string)
        }))
    }

    /// Record the running platform version
    pub async fn update(&self) -> Result<()> {
        self.update_to(PLATFORM_VERSION).await
    }

    /// Record an explicit version
    pub async fn update_to(&self, version: &str) -> Result<()> {
        self.db.create_collection(VERSION_COLLECTION).await?;
        self.db
            .write_record(
                VERSION_COLLECTION,
                VERSION_KEY,
                json!({ "value": version, "installedAt": Utc::now().to_rfc3339() }),
            )
            .await
    }

    /// Whether the installed version satisfies a semver range
    pub async fn satisfies(&self, range: &str) -> Result<bool> {
        let req = VersionReq::parse(range)
            .map_err(|e| Error::Config(format!("invalid version range '{range}': {e}")))?;

        Ok(self
            .get()
            .await?
            .and_then(|version| parse_lenient(&version))
            .is_some_and(|version| req.matches(&version)))
    }
}

/// Supported server version range per dialect
pub fn supported_range(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Mysql => ">=8.0.17",
        Dialect::Sqlite => "3",
        Dialect::Postgres => ">=10",
    }
}

/// Check a reported server version against the supported range
pub fn check_server_version(dialect: Dialect, reported: &str) -> Result<()> {
    let range = supported_range(dialect);
    let supported = match (VersionReq::parse(range), parse_lenient(reported)) {
        (Ok(req), Some(version)) => req.matches(&version),
        _ => false,
    };

    if supported {
        return Ok(());
    }

    Err(Error::UnsupportedDatabase(format!(
        "{dialect} {reported} is not supported; the platform requires MySQL 8.0.17 and above, SQLite 3.x or PostgreSQL 10+"
    )))
}

/// Parse versions such as `8.0.36-0ubuntu0.22.04.1`, `16.2` or `10`
fn parse_lenient(raw: &str) -> Option<Version> {
    let numeric: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut parts = numeric.split('.').filter(|part| !part.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    Some(Version::new(major, minor, patch))
}
