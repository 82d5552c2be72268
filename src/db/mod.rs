//! Database module for the Moodle source database.
//!
//! Provides a single long-lived MySQL session using SQLx. The session is
//! owned by the collection cycle and is never pooled: it is established once,
//! reused for every tick and only replaced after it breaks.

mod decode;

use crate::catalog::{Fragment, Param, QueryDefinition, Shape};
use crate::collector::{Connector, Session};
use crate::config::Config;
use crate::error::CollectError;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use std::time::Duration;
use tracing::{debug, info};

/// Opens MySQL sessions configured for metric collection.
#[derive(Clone)]
pub struct MySqlConnector {
    options: MySqlConnectOptions,
    database: String,
    connect_timeout: Duration,
}

impl MySqlConnector {
    /// Session setup statements, run once per connection.
    const SESSION_SETUP: [&'static str; 2] = [
        "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED",
        "SET SESSION sql_mode = 'STRICT_TRANS_TABLES'",
    ];

    pub fn new(config: &Config) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.db_host)
            .port(config.db_port)
            .username(&config.db_user)
            .password(&config.db_password)
            .database(&config.db_name);

        Self {
            options,
            database: config.db_name.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Session = MySqlSession;

    async fn connect(&self) -> Result<MySqlSession, CollectError> {
        let mut conn = tokio::time::timeout(self.connect_timeout, self.options.connect())
            .await
            .map_err(|_| CollectError::ConnectTimeout(self.connect_timeout))?
            .map_err(CollectError::Connect)?;

        for statement in Self::SESSION_SETUP {
            conn.execute(statement)
                .await
                .map_err(CollectError::Connect)?;
        }

        info!(database = %self.database, "Database session established");

        Ok(MySqlSession {
            conn,
            database: self.database.clone(),
        })
    }
}

/// An open MySQL session.
pub struct MySqlSession {
    conn: MySqlConnection,
    database: String,
}

#[async_trait]
impl Session for MySqlSession {
    async fn fetch(&mut self, definition: &QueryDefinition) -> Result<Fragment, CollectError> {
        let mut query = sqlx::query(definition.sql);
        if definition.param == Param::DatabaseName {
            query = query.bind(self.database.clone());
        }
        let query_err = |source: sqlx::Error| CollectError::Query {
            group: definition.group,
            source,
        };

        let fragment = match definition.shape {
            Shape::Scalar(kind) => {
                let row = query
                    .fetch_optional(&mut self.conn)
                    .await
                    .map_err(query_err)?;
                let value = match row {
                    Some(row) => decode::column(definition.group, &row, 0, kind)?,
                    None => crate::catalog::Value::Null,
                };
                Fragment::Scalar(value)
            }
            Shape::RowSet(columns) => {
                let rows = query.fetch_all(&mut self.conn).await.map_err(query_err)?;
                let decoded = rows
                    .iter()
                    .map(|row| decode::row(definition.group, row, columns))
                    .collect::<Result<Vec<_>, _>>()?;
                Fragment::Rows(decoded)
            }
        };

        debug!(group = definition.group, "Query completed");
        Ok(fragment)
    }

    async fn close(self) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Error while closing database session");
        }
    }
}
