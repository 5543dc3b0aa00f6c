//! The statement-execution seam between the engine and a backend.

use crate::{Result, Value, ValueCodec};

/// One result row: column names with their raw values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to append a column.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Look up a column by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Raw statement execution against one backend.
///
/// Implementations own connection management and report every failure as
/// [`Error::Storage`](crate::Error::Storage) carrying the statement text.
pub trait SqlExecutor {
    /// Literal encoding rules of this backend.
    fn codec(&self) -> &dyn ValueCodec;

    /// Whether the backend is currently reachable.
    fn is_available(&self) -> bool;

    /// Run a statement, returning whether it produced any rows.
    fn execute(&self, sql: &str) -> Result<bool>;

    /// Run a statement and collect its rows.
    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Run a statement and report the affected row count, if known.
    fn execute_update(&self, sql: &str) -> Result<Option<u64>>;
}
