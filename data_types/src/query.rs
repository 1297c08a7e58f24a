use crate::Row;

/// A SQL query request.
///
/// When `tables` is empty the dispatcher extracts the referenced table names
/// from the SQL text; an explicit list is authoritative and skips extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlQueryRequest {
    pub sql: String,
    pub tables: Vec<String>,
}

impl SqlQueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            tables: vec![],
        }
    }

    /// Override table extraction with an explicit list.
    pub fn with_tables(mut self, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }
}

/// The success value of a SQL query.
#[derive(Debug, Default)]
pub struct SqlQueryOk {
    /// Rows affected by a DML/DDL statement, as reported by the server.
    pub affected_rows: u32,
    rows: Vec<Row>,
}

impl SqlQueryOk {
    pub fn new(affected_rows: u32, rows: Vec<Row>) -> Self {
        Self {
            affected_rows,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// A single-pass view over the decoded rows.
    pub fn stream(self) -> impl Iterator<Item = Row> {
        self.rows.into_iter()
    }
}
