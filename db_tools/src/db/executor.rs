//! SQL executor
//!
//! Applies a batch of DDL statements best-effort: a failing statement is
//! reported and skipped, and the remaining statements still run.

use crate::db::connection::DatabaseConnection;
use crate::error::Result;

/// A statement that failed to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFailure {
    /// Position in the batch, starting at 0
    pub index: usize,
    pub statement: String,
    pub error: String,
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub executed: usize,
    pub failures: Vec<StatementFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.executed + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// SQL executor for running statements on one connection
pub struct SqlExecutor {
    connection: DatabaseConnection,
}

impl SqlExecutor {
    /// Create a new SQL executor
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Execute a single SQL statement
    pub async fn execute(&self, sql: &str) -> Result<()> {
        tracing::info!(connection = %self.connection.id(), sql, "Executing statement");
        self.connection.execute(sql).await
    }

    /// Execute statements in order, continuing past failures
    pub async fn execute_batch(&self, statements: &[String]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, statement) in statements.iter().enumerate() {
            match self.execute(statement).await {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    tracing::error!(
                        connection = %self.connection.id(),
                        sql = %statement,
                        error = %e,
                        "Statement failed"
                    );
                    report.failures.push(StatementFailure {
                        index,
                        statement: statement.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            executed = report.executed,
            failed = report.failures.len(),
            "Applied statement batch"
        );
        report
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let connection = DatabaseConnection::connect(&DatabaseConfig::sqlite(":memory:"))
            .await
            .unwrap();
        let executor = SqlExecutor::new(connection);

        let report = executor
            .execute_batch(&[
                "CREATE TABLE a (id INTEGER)".to_string(),
                "ALTER TABLE missing ADD COLUMN x INTEGER".to_string(),
                "CREATE TABLE b (id INTEGER)".to_string(),
            ])
            .await;

        assert_eq!(report.executed, 2);
        assert_eq!(report.total(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(report.failures[0].statement.contains("missing"));
        assert!(!report.is_success());

        executor.execute("SELECT * FROM b").await.unwrap();
    }
}
