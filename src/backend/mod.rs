//! Driver handles for the supported backend families.
//!
//! Postgres, MySQL and SQLite go through sqlx connection pools; SQL Server
//! goes through a dedicated tiberius client over a compat-wrapped TCP
//! stream. Connection strings are passed through opaquely: the scheme (or
//! ADO/JDBC shape for SQL Server) only selects the driver.

use std::time::Duration;

use sqlx::migrate::MigrateDatabase;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::dispatch::Statement;
use crate::error::{ConnectError, DbError};
use crate::value::codec;
use crate::value::Row;

type TdsClient = tiberius::Client<Compat<TcpStream>>;

/// An open backend handle, owned exclusively by one worker task.
pub(crate) enum Driver {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
    Mssql(Box<TdsClient>),
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Driver::MySql(_) => "Driver::MySql",
            Driver::Postgres(_) => "Driver::Postgres",
            Driver::Sqlite(_) => "Driver::Sqlite",
            Driver::Mssql(_) => "Driver::Mssql",
        })
    }
}

impl Driver {
    /// Opens a backend selected by the shape of `url`.
    ///
    /// Fails on an unrecognized URL, driver-level auth/connect errors, or
    /// when the backend does not come up within `connect_timeout`.
    pub(crate) async fn connect(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let timeout_ms = connect_timeout.as_millis() as u64;

        if url.starts_with("mysql://") {
            let pool = timeout(connect_timeout, MySqlPool::connect(url))
                .await
                .map_err(|_| ConnectError::Timeout(timeout_ms))??;
            Ok(Driver::MySql(pool))
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let pool = timeout(
                connect_timeout,
                PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(Duration::from_secs(2))
                    .connect(url),
            )
            .await
            .map_err(|_| ConnectError::Timeout(timeout_ms))??;
            Ok(Driver::Postgres(pool))
        } else if url.starts_with("sqlite:") {
            if !Sqlite::database_exists(url).await? {
                Sqlite::create_database(url).await?;
            }
            // One persistent connection: an in-memory database lives and
            // dies with it, so it must never be reaped or duplicated.
            let pool = timeout(
                connect_timeout,
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(url),
            )
            .await
            .map_err(|_| ConnectError::Timeout(timeout_ms))??;
            Ok(Driver::Sqlite(pool))
        } else if looks_like_mssql(url) {
            let client = timeout(connect_timeout, connect_mssql(url))
                .await
                .map_err(|_| ConnectError::Timeout(timeout_ms))??;
            Ok(Driver::Mssql(Box::new(client)))
        } else {
            Err(ConnectError::BadUrl)
        }
    }

    /// Executes one statement and decodes its full result set.
    pub(crate) async fn run_query(&mut self, statement: &Statement) -> Result<Vec<Row>, DbError> {
        debug!(sql = %statement.sql, binds = statement.binds.len(), "running query");
        match self {
            Driver::MySql(pool) => {
                let query = codec::bind_all::<MySql>(&statement.sql, &statement.binds)?;
                let rows = query.fetch_all(&*pool).await.map_err(DbError::from)?;
                codec::decode_rows::<MySql>(&rows)
            }
            Driver::Postgres(pool) => {
                let query = codec::bind_all::<Postgres>(&statement.sql, &statement.binds)?;
                let rows = query.fetch_all(&*pool).await.map_err(DbError::from)?;
                codec::decode_rows::<Postgres>(&rows)
            }
            Driver::Sqlite(pool) => {
                let query = codec::bind_all::<Sqlite>(&statement.sql, &statement.binds)?;
                let rows = query.fetch_all(&*pool).await.map_err(DbError::from)?;
                codec::decode_rows::<Sqlite>(&rows)
            }
            Driver::Mssql(client) => {
                codec::check_tds_binds(&statement.binds)?;
                let params: Vec<&dyn tiberius::ToSql> = statement
                    .binds
                    .iter()
                    .map(|v| v as &dyn tiberius::ToSql)
                    .collect();
                let stream = client
                    .query(statement.sql.as_str(), &params)
                    .await
                    .map_err(DbError::from)?;
                let row_sets = stream.into_results().await.map_err(DbError::from)?;
                let rows: Vec<tiberius::Row> = row_sets.into_iter().flatten().collect();
                codec::decode_tds_rows(rows)
            }
        }
    }

    /// Executes an ordered batch inside one backend transaction.
    ///
    /// All-or-nothing: a mid-batch failure rolls everything back and the
    /// backend message is returned verbatim, with no per-statement detail.
    /// Parameter-free statements run through the raw (unprepared) path so
    /// semicolon-delimited batches reach the backend untouched.
    pub(crate) async fn run_transaction(
        &mut self,
        statements: Vec<Statement>,
    ) -> Result<(), DbError> {
        debug!(statements = statements.len(), "running transaction");
        match self {
            Driver::MySql(pool) => {
                let mut tx = pool.begin().await.map_err(DbError::from)?;
                for statement in &statements {
                    if statement.binds.is_empty() {
                        // Unprepared simple-query path: semicolon batches
                        // reach the backend untouched.
                        sqlx::Executor::execute(&mut *tx, statement.sql.as_str())
                            .await
                            .map_err(DbError::from)?;
                    } else {
                        let query = codec::bind_all::<MySql>(&statement.sql, &statement.binds)?;
                        query.execute(&mut *tx).await.map_err(DbError::from)?;
                    }
                }
                tx.commit().await.map_err(DbError::from)
            }
            Driver::Postgres(pool) => {
                let mut tx = pool.begin().await.map_err(DbError::from)?;
                for statement in &statements {
                    if statement.binds.is_empty() {
                        // Unprepared simple-query path: semicolon batches
                        // reach the backend untouched.
                        sqlx::Executor::execute(&mut *tx, statement.sql.as_str())
                            .await
                            .map_err(DbError::from)?;
                    } else {
                        let query =
                            codec::bind_all::<Postgres>(&statement.sql, &statement.binds)?;
                        query.execute(&mut *tx).await.map_err(DbError::from)?;
                    }
                }
                tx.commit().await.map_err(DbError::from)
            }
            Driver::Sqlite(pool) => {
                let mut tx = pool.begin().await.map_err(DbError::from)?;
                for statement in &statements {
                    if statement.binds.is_empty() {
                        // Unprepared simple-query path: semicolon batches
                        // reach the backend untouched.
                        sqlx::Executor::execute(&mut *tx, statement.sql.as_str())
                            .await
                            .map_err(DbError::from)?;
                    } else {
                        let query = codec::bind_all::<Sqlite>(&statement.sql, &statement.binds)?;
                        query.execute(&mut *tx).await.map_err(DbError::from)?;
                    }
                }
                tx.commit().await.map_err(DbError::from)
            }
            Driver::Mssql(client) => {
                for statement in &statements {
                    codec::check_tds_binds(&statement.binds)?;
                }
                client
                    .execute("BEGIN TRANSACTION", &[])
                    .await
                    .map_err(DbError::from)?;
                for statement in &statements {
                    let params: Vec<&dyn tiberius::ToSql> = statement
                        .binds
                        .iter()
                        .map(|v| v as &dyn tiberius::ToSql)
                        .collect();
                    if let Err(err) = client.execute(statement.sql.as_str(), &params).await {
                        let _ = client.execute("ROLLBACK", &[]).await;
                        return Err(DbError::from(err));
                    }
                }
                client.execute("COMMIT", &[]).await.map_err(DbError::from)?;
                Ok(())
            }
        }
    }
}

/// SQL Server connection strings are not URLs: accept JDBC
/// (`jdbc:sqlserver://...`) and ADO (`server=...;...`) shapes.
fn looks_like_mssql(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("jdbc:sqlserver://") || lower.contains("server=")
}

async fn connect_mssql(url: &str) -> Result<TdsClient, ConnectError> {
    let config = if url.to_ascii_lowercase().starts_with("jdbc:sqlserver://") {
        tiberius::Config::from_jdbc_string(url)?
    } else {
        tiberius::Config::from_ado_string(url)?
    };

    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    let client = tiberius::Client::connect(config, tcp.compat_write()).await?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mssql_shapes_are_recognized() {
        assert!(looks_like_mssql("server=tcp:localhost,1433;user=sa;password=x"));
        assert!(looks_like_mssql("jdbc:sqlserver://localhost:1433;user=sa"));
        assert!(!looks_like_mssql("postgres://localhost/db"));
        assert!(!looks_like_mssql("sqlite::memory:"));
    }

    #[tokio::test]
    async fn unrecognized_url_is_rejected() {
        let err = Driver::connect("mongodb://localhost", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::BadUrl));
    }
}
