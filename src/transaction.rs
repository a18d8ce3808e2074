//! Ordered, parameterized statement batches submitted as one atomic unit.

use crate::dispatch::Statement;
use crate::error::DbError;
use crate::value::Value;

/// An ordered sequence of statements to be committed all-or-nothing.
///
/// Statements are executed in push order inside a single backend
/// transaction; a failure anywhere rolls back everything.
///
/// # Examples
///
/// ```
/// use sqlgate::{params, TransactionSpec};
///
/// let mut spec = TransactionSpec::new();
/// spec.push("INSERT INTO t(x) VALUES (?)", params![1]).unwrap();
/// spec.push("UPDATE t SET x = x + 1", params![]).unwrap();
/// assert_eq!(spec.len(), 2);
/// ```
#[derive(Debug, Default, Clone)]
pub struct TransactionSpec {
    statements: Vec<Statement>,
}

impl TransactionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one statement.
    ///
    /// A semicolon-delimited multi-statement string is forwarded to the
    /// backend unprepared and therefore cannot carry bound parameters;
    /// pushing one with parameters is rejected as `InvalidArgument`.
    pub fn push(
        &mut self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<&mut Self, DbError> {
        let sql = sql.into();
        if !params.is_empty() && is_multi_statement(&sql) {
            return Err(DbError::invalid(
                "multi-statement batches cannot carry bound parameters",
            ));
        }
        self.statements.push(Statement { sql, binds: params });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub(crate) fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

/// Statement-boundary heuristic: an interior semicolon (ignoring a single
/// trailing one) marks a multi-statement batch. SQL validation itself is
/// the backend's job.
fn is_multi_statement(sql: &str) -> bool {
    sql.trim_end().trim_end_matches(';').contains(';')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::params;

    #[test]
    fn push_preserves_order() {
        let mut spec = TransactionSpec::new();
        spec.push("a", params![]).unwrap();
        spec.push("b", params![1]).unwrap();
        let statements = spec.into_statements();
        assert_eq!(statements[0].sql, "a");
        assert_eq!(statements[1].sql, "b");
        assert_eq!(statements[1].binds.len(), 1);
    }

    #[test]
    fn multi_statement_with_params_is_rejected() {
        let mut spec = TransactionSpec::new();
        let err = spec
            .push("DELETE FROM a; DELETE FROM b", params![1])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(spec.is_empty());
    }

    #[test]
    fn multi_statement_without_params_is_accepted() {
        let mut spec = TransactionSpec::new();
        spec.push("DELETE FROM a; DELETE FROM b;", params![])
            .unwrap();
        assert_eq!(spec.len(), 1);
    }

    #[test]
    fn trailing_semicolon_is_not_a_batch() {
        let mut spec = TransactionSpec::new();
        spec.push("INSERT INTO t VALUES (?);", params![1]).unwrap();
        assert_eq!(spec.len(), 1);
    }
}
