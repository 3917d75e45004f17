//! Database connection utilities.

use sensor_map_config::DatabaseConfig;
use switchy_database::Database;
use switchy_database_connection::Credentials;

use crate::DbError;

/// Opens a `PostGIS` connection described by `config`.
///
/// Configures a `statement_timeout` so stalled queries fail with an error
/// instead of hanging a request indefinitely.
///
/// # Errors
///
/// Returns [`DbError`] if the URL cannot be parsed or the connection fails.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn Database>, DbError> {
    // Strip query parameters (e.g., ?sslmode=require) that the Credentials
    // parser doesn't understand. TLS is handled by the connector.
    let url_base = config.url.split('?').next().unwrap_or(&config.url);

    let creds = Credentials::from_url(url_base).map_err(|e| DbError::Connection {
        message: format!("Invalid database URL: {e}"),
    })?;
    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| DbError::Connection {
            message: e.to_string(),
        })?;

    db.exec_raw(&format!(
        "SET statement_timeout = '{}s'",
        config.statement_timeout_secs
    ))
    .await?;

    log::info!(
        "Connected to PostGIS (statement_timeout {}s)",
        config.statement_timeout_secs
    );
    Ok(db)
}
