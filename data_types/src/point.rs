use crate::Value;
use hashbrown::HashMap;
use thiserror::Error;

/// A single measurement destined for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    table: String,
    /// Milliseconds since the UNIX epoch.
    timestamp: i64,
    tags: HashMap<String, Value>,
    fields: HashMap<String, Value>,
}

impl Point {
    /// Start building a point for `table`.
    pub fn builder(table: impl Into<String>) -> PointBuilder {
        PointBuilder::new(table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn tags(&self) -> &HashMap<String, Value> {
        &self.tags
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }
}

/// Errors from [`PointBuilder::build`].
#[derive(Debug, Error, PartialEq)]
pub enum PointError {
    #[error("point for table \"{0}\" has no timestamp")]
    MissingTimestamp(String),

    #[error("point for table \"{0}\" has no fields")]
    NoFields(String),

    #[error("point table name is empty")]
    EmptyTable,
}

/// Builder for [`Point`].
///
/// A point requires a table name, a timestamp and at least one field. Tag
/// keys and field keys are not checked for disjointness; the server owns
/// that schema decision.
#[derive(Debug)]
pub struct PointBuilder {
    table: String,
    timestamp: Option<i64>,
    tags: HashMap<String, Value>,
    fields: HashMap<String, Value>,
}

impl PointBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            timestamp: None,
            tags: HashMap::new(),
            fields: HashMap::new(),
        }
    }

    /// Set the timestamp, in milliseconds since the UNIX epoch.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Point, PointError> {
        if self.table.is_empty() {
            return Err(PointError::EmptyTable);
        }
        let timestamp = self
            .timestamp
            .ok_or_else(|| PointError::MissingTimestamp(self.table.clone()))?;
        if self.fields.is_empty() {
            return Err(PointError::NoFields(self.table));
        }

        Ok(Point {
            table: self.table,
            timestamp,
            tags: self.tags,
            fields: self.fields,
        })
    }
}
