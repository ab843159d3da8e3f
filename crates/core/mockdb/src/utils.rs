//! Helpers for tests that run against an ephemeral instance.

/// The statements [`truncate_database`] needs from a live connection.
pub trait SqlSession {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Database the session is connected to.
    fn database(&self) -> &str;

    /// Executes `sql` through the text protocol, discarding any result.
    fn execute(&mut self, sql: &str) -> Result<(), Self::Error>;

    /// Names of the base tables (not views) of `database`.
    fn base_tables(&mut self, database: &str) -> Result<Vec<String>, Self::Error>;
}

/// Empties every base table of the session's database, then runs
/// `after_queries` in order.
///
/// Foreign key checks are off while truncating. Blank after-queries are
/// skipped; the others are trimmed before execution.
pub fn truncate_database<S, Q>(session: &mut S, after_queries: &[Q]) -> Result<(), S::Error>
where
    S: SqlSession + ?Sized,
    Q: AsRef<str>,
{
    let name = session.database().to_string();
    let database = quote_identifier(&name);

    session.execute(&format!("USE {database}"))?;
    session.execute("SET FOREIGN_KEY_CHECKS=0")?;

    let tables = session.base_tables(&name)?;
    for table in &tables {
        session.execute(&format!("TRUNCATE TABLE {database}.{}", quote_identifier(table)))?;
    }

    session.execute("SET FOREIGN_KEY_CHECKS=1")?;

    for query in after_queries {
        let query = query.as_ref().trim();
        if !query.is_empty() {
            session.execute(query)?;
        }
    }

    tracing::debug!(database = %name, tables = tables.len(), "truncated database");

    Ok(())
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
