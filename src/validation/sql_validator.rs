use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

use crate::error::OperationError;

/// Checks statements composed by the SQL variants before they reach a store
pub struct SqlValidator;

impl SqlValidator {
    /// Ensure `sql` is exactly one query (SELECT, possibly compound)
    pub fn validate_query(sql: &str) -> Result<(), OperationError> {
        let statement = Self::parse_single(sql)?;

        match statement {
            Statement::Query(_) => Ok(()),
            other => Err(OperationError::InvalidSql(format!(
                "Only queries can back a SQL object. Found: {}",
                other
            ))),
        }
    }

    /// Limit a query to `count` rows
    ///
    /// Queries without a LIMIT clause get one appended, queries that already
    /// have one are wrapped so both limits apply.
    pub fn apply_limit(sql: &str, count: u64) -> Result<String, OperationError> {
        let statement = Self::parse_single(sql)?;
        let trimmed_sql = sql.trim().trim_end_matches(';').trim();

        if Self::check_limit_in_statement(&statement) {
            Ok(format!("SELECT * FROM ({}) LIMIT {}", trimmed_sql, count))
        } else {
            Ok(format!("{} LIMIT {}", trimmed_sql, count))
        }
    }

    /// Quote an identifier for SQLite (double quotes, embedded quotes doubled)
    pub fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn parse_single(sql: &str) -> Result<Statement, OperationError> {
        let dialect = SQLiteDialect {};
        let mut ast = Parser::parse_sql(&dialect, sql)
            .map_err(|e| OperationError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        match ast.len() {
            0 => Err(OperationError::InvalidSql("Empty SQL query".to_string())),
            1 => Ok(ast.remove(0)),
            n => Err(OperationError::InvalidSql(format!(
                "Expected a single statement, found {}",
                n
            ))),
        }
    }

    /// Check if a statement has a LIMIT clause using AST analysis
    fn check_limit_in_statement(stmt: &Statement) -> bool {
        match stmt {
            Statement::Query(query) => query.limit_clause.is_some(),
            _ => false,
        }
    }
}
