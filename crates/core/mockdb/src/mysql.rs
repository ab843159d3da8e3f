//! [`Driver`] adapter over the `sqlx` MySQL driver.
//!
//! The interception layer is synchronous, so the adapter owns a private
//! current-thread Tokio runtime and blocks on it. It must not be used from
//! within another Tokio runtime; wrap calls in `spawn_blocking` there.

use std::{str::FromStr as _, sync::Arc};

use sqlx::{
    Connection as _,
    mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode},
};
use tokio::runtime::Runtime;

use crate::{
    driver::{BoxError, Driver, DriverProperty},
    instance::ConnectionTarget,
    options::Options,
    utils::SqlSession,
};

/// Release line of the `sqlx` driver behind this adapter.
const DRIVER_VERSION: (u32, u32) = (0, 8);

const USER: &str = "user";
const PASSWORD: &str = "password";
const CHARSET: &str = "charset";
const COLLATION: &str = "collation";
const SSL_MODE: &str = "sslMode";
const SOCKET: &str = "socket";

/// Options understood by [`connect_options`].
const PROPERTIES: [(&str, &str); 6] = [
    (USER, "Account to connect as"),
    (PASSWORD, "Password of the account"),
    (CHARSET, "Connection character set"),
    (COLLATION, "Connection collation"),
    (
        SSL_MODE,
        "DISABLED, PREFERRED, REQUIRED, VERIFY_CA or VERIFY_IDENTITY",
    ),
    (SOCKET, "Unix domain socket path, used instead of TCP"),
];

/// Connects to MySQL through `sqlx`, blocking on a private runtime.
#[derive(Debug, Clone)]
pub struct SqlxMySqlDriver {
    runtime: Arc<Runtime>,
}

impl SqlxMySqlDriver {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl Driver for SqlxMySqlDriver {
    type Connection = MySqlSession;

    fn connect(
        &self,
        target: &ConnectionTarget,
        options: &Options,
    ) -> Result<Self::Connection, BoxError> {
        let connect_options = connect_options(target, options)?;
        let conn = self
            .runtime
            .block_on(MySqlConnection::connect_with(&connect_options))?;

        tracing::debug!(%target, "connected to mysql");

        Ok(MySqlSession {
            runtime: self.runtime.clone(),
            conn,
            database: target.database().to_string(),
        })
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("mysql://") || url.starts_with("mariadb://")
    }

    fn major_version(&self) -> u32 {
        DRIVER_VERSION.0
    }

    fn minor_version(&self) -> u32 {
        DRIVER_VERSION.1
    }

    fn property_info(&self, options: &Options) -> Vec<DriverProperty> {
        PROPERTIES
            .iter()
            .map(|&(name, description)| DriverProperty {
                name,
                description,
                required: false,
                value: options.get(name).cloned(),
            })
            .collect()
    }
}

/// Maps a rewritten target and its cleaned options onto `sqlx` connect options.
///
/// Options the adapter does not understand are ignored.
pub fn connect_options(
    target: &ConnectionTarget,
    options: &Options,
) -> Result<MySqlConnectOptions, sqlx::Error> {
    let mut connect_options = MySqlConnectOptions::new()
        .host(target.host())
        .port(target.port())
        .database(target.database());

    for (name, value) in options {
        connect_options = match name.as_str() {
            USER => connect_options.username(value),
            PASSWORD => connect_options.password(value),
            CHARSET => connect_options.charset(value),
            COLLATION => connect_options.collation(value),
            SSL_MODE => connect_options.ssl_mode(MySqlSslMode::from_str(value)?),
            SOCKET => connect_options.socket(value),
            _ => {
                tracing::debug!(option = %name, "ignoring option unknown to the mysql driver");
                connect_options
            }
        };
    }

    Ok(connect_options)
}

/// An open connection to an ephemeral instance.
#[derive(Debug)]
pub struct MySqlSession {
    runtime: Arc<Runtime>,
    conn: MySqlConnection,
    database: String,
}

impl MySqlSession {
    /// The underlying `sqlx` connection.
    pub fn connection(&mut self) -> &mut MySqlConnection {
        &mut self.conn
    }

    /// Runs `fut` to completion on the session's runtime.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    pub fn close(self) -> Result<(), sqlx::Error> {
        self.runtime.block_on(self.conn.close())
    }
}

impl SqlSession for MySqlSession {
    type Error = sqlx::Error;

    fn database(&self) -> &str {
        &self.database
    }

    fn execute(&mut self, sql: &str) -> Result<(), Self::Error> {
        let conn = &mut self.conn;
        self.runtime
            .block_on(sqlx::raw_sql(sql).execute(conn))
            .map(drop)
    }

    fn base_tables(&mut self, database: &str) -> Result<Vec<String>, Self::Error> {
        let conn = &mut self.conn;
        self.runtime.block_on(
            sqlx::query_scalar::<_, String>(
                "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
                 WHERE table_schema = ? AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
            )
            .bind(database)
            .fetch_all(conn),
        )
    }
}
