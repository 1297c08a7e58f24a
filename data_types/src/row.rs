use crate::Value;
use hashbrown::HashMap;
use std::sync::Arc;

/// The ordered column names of a result set, shared by all of its rows.
#[derive(Debug)]
pub struct RowSchema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl RowSchema {
    pub fn new(columns: Vec<String>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { columns, index }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// The position of `name`, case-sensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One decoded result row.
#[derive(Debug, Clone)]
pub struct Row {
    schema: Arc<RowSchema>,
    values: Vec<Value>,
}

impl Row {
    /// Pair `values` with their `schema`.
    ///
    /// # Panics
    ///
    /// Panics if the value count does not match the schema width; the decoder
    /// constructing rows guarantees this.
    pub fn new(schema: Arc<RowSchema>, values: Vec<Value>) -> Self {
        assert_eq!(
            schema.len(),
            values.len(),
            "row width does not match schema"
        );
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The value of the named column, case-sensitive.
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.schema
            .column_index(name)
            .map(|i| &self.values[i])
    }
}
