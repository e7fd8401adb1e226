//! Provider resolution.
//!
//! Connection strings carry a non-standard `ProviderName=...` pseudo
//! attribute selecting the dialect; it is stripped before the rest of the
//! string reaches the driver. Resolution maps the provider id to a dialect
//! plus a bundled driver binding, or to a caller-injected [`Driver`] for
//! providers shipped without one.

use std::sync::Arc;

use crate::{
    dialect::{Dialect, DialectKind},
    driver::{Connection, Driver},
    DbError,
};

/// A resolved provider: dialect, driver and the cleaned connection string.
#[derive(Debug, Clone)]
pub struct Provider {
    kind: DialectKind,
    connection_string: String,
    driver: Option<Arc<dyn Driver>>,
}

impl Provider {
    /// Resolves a connection string, optionally with an injected driver
    /// taking precedence over the bundled one.
    ///
    /// # Errors
    ///
    /// * [`DbError::Config`] when the `ProviderName` attribute is missing
    ///   or names an unknown provider.
    pub fn resolve(
        connection_string: &str,
        driver: Option<Arc<dyn Driver>>,
    ) -> Result<Self, DbError> {
        let (provider_name, cleaned) = split_provider_name(connection_string)?;
        let kind = DialectKind::from_provider_name(&provider_name).ok_or_else(|| {
            DbError::Config(format!("Unknown database provider: {provider_name}"))
        })?;

        Ok(Self {
            kind,
            connection_string: cleaned,
            driver: driver.or_else(|| bundled_driver(kind)),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> DialectKind {
        self.kind
    }

    #[must_use]
    pub fn dialect(&self) -> &'static dyn Dialect {
        self.kind.dialect()
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Opens a fresh connection through the resolved driver.
    ///
    /// # Errors
    ///
    /// * [`DbError::Config`] when no driver is available for the provider.
    /// * Any driver connect error.
    pub async fn open_connection(&self) -> Result<Box<dyn Connection>, DbError> {
        let driver = self.driver.as_ref().ok_or_else(|| {
            DbError::Config(format!(
                "no driver is bundled for provider '{}'; inject one with TableBuilder::driver",
                self.dialect().provider_name()
            ))
        })?;
        driver.open(&self.connection_string).await
    }
}

/// Pulls `ProviderName=...` out of a `;`-separated connection string,
/// returning the provider id and the string without that attribute.
///
/// # Errors
///
/// * [`DbError::Config`] when the attribute is absent.
pub fn split_provider_name(connection_string: &str) -> Result<(String, String), DbError> {
    let mut provider_name = None;
    let mut rest = vec![];

    for segment in connection_string.split(';') {
        if segment.is_empty() {
            continue;
        }
        match segment.split_once('=') {
            Some((key, value)) if key.trim().eq_ignore_ascii_case("providername") => {
                provider_name = Some(value.trim().to_string());
            }
            _ => rest.push(segment),
        }
    }

    provider_name.map_or_else(
        || {
            Err(DbError::Config(format!(
                "Cannot find ProviderName=... in connection string \"{connection_string}\""
            )))
        },
        |name| Ok((name, rest.join(";"))),
    )
}

fn bundled_driver(kind: DialectKind) -> Option<Arc<dyn Driver>> {
    match kind {
        #[cfg(feature = "sqlite")]
        DialectKind::Sqlite => Some(Arc::new(crate::rusqlite::RusqliteDriver)),
        #[cfg(feature = "postgres")]
        DialectKind::PostgreSql => Some(Arc::new(crate::postgres::PostgresDriver::default())),
        #[cfg(feature = "mysql")]
        DialectKind::MySql => Some(Arc::new(crate::sqlx::MySqlSqlxDriver)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn provider_attribute_is_extracted_and_stripped() {
        let (name, rest) =
            split_provider_name("Data Source=:memory:;ProviderName=sqlite;Cache=Shared").unwrap();
        assert_eq!(name, "sqlite");
        assert_eq!(rest, "Data Source=:memory:;Cache=Shared");
    }

    #[test]
    fn missing_provider_attribute_is_a_config_error() {
        let err = split_provider_name("Data Source=:memory:").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let err = Provider::resolve("ProviderName=db2;Server=x", None).unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn known_provider_resolves_dialect() {
        let provider = Provider::resolve("ProviderName=Npgsql;host=localhost", None).unwrap();
        assert_eq!(provider.kind(), DialectKind::PostgreSql);
        assert_eq!(provider.connection_string(), "host=localhost");
    }

    #[tokio::test]
    async fn providers_without_bundled_drivers_fail_at_open() {
        let provider = Provider::resolve("ProviderName=oracle;Server=x", None).unwrap();
        let err = provider.open_connection().await.err().unwrap();
        assert!(matches!(err, DbError::Config(_)));
    }
}
