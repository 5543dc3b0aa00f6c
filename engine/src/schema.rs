//! Table descriptors mapping typed records to columns.
//!
//! Every entity type describes itself once through a [`TableSchema`]: the
//! table name, the integer primary key and an ordered list of columns with
//! plain function accessors. The engine never inspects records any other way.

use crate::{ColumnType, Error, Result, Row, Value, ValueCodec};

/// Column name used for the primary key unless a schema says otherwise.
pub const DEFAULT_PRIMARY_KEY: &str = "_id";

/// Reads a column value out of a record.
pub type Getter<T> = fn(&T) -> Value;

/// Writes a column value into a record.
pub type Setter<T> = fn(&mut T, Value) -> Result<()>;

/// A record type persisted by the engine.
pub trait Entity: Default + Clone + 'static {
    /// Describe the table backing this type.
    fn schema() -> TableSchema<Self>;
}

/// The integer primary key of a table.
pub struct PrimaryKey<T> {
    name: String,
    get: fn(&T) -> Option<i32>,
    set: fn(&mut T, i32),
}

impl<T> PrimaryKey<T> {
    /// Primary key stored in the default `_id` column.
    pub fn new(get: fn(&T) -> Option<i32>, set: fn(&mut T, i32)) -> Self {
        Self::named(DEFAULT_PRIMARY_KEY, get, set)
    }

    pub fn named(name: impl Into<String>, get: fn(&T) -> Option<i32>, set: fn(&mut T, i32)) -> Self {
        Self {
            name: name.into(),
            get,
            set,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A field declared to mirror a field of another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub table: String,
    pub column: String,
}

/// Definition of a non-key column.
pub struct Column<T> {
    name: String,
    column_type: ColumnType,
    get: Getter<T>,
    set: Setter<T>,
    insertable: bool,
    not_null: bool,
    default_sql: Option<String>,
    mirror: Option<Mirror>,
}

impl<T> Column<T> {
    pub fn new(
        name: impl Into<String>,
        column_type: ColumnType,
        get: Getter<T>,
        set: Setter<T>,
    ) -> Self {
        Self {
            name: name.into(),
            column_type,
            get,
            set,
            insertable: true,
            not_null: false,
            default_sql: None,
            mirror: None,
        }
    }

    /// The column is computed by the database: read, never written.
    pub fn not_insertable(mut self) -> Self {
        self.insertable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// SQL expression used as the column's `DEFAULT`.
    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default_sql = Some(expr.into());
        self
    }

    /// Keep this field equal to `table.column` wherever the two matched.
    pub fn mirrors(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.mirror = Some(Mirror {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_insertable(&self) -> bool {
        self.insertable
    }

    pub fn is_not_null(&self) -> bool {
        self.not_null
    }

    pub fn default_sql(&self) -> Option<&str> {
        self.default_sql.as_deref()
    }

    pub fn mirror(&self) -> Option<&Mirror> {
        self.mirror.as_ref()
    }

    pub fn value_of(&self, record: &T) -> Value {
        (self.get)(record)
    }

    pub fn assign(&self, record: &mut T, value: Value) -> Result<()> {
        (self.set)(record, value).map_err(|e| e.in_column(&self.name))
    }
}

/// Descriptor of the table backing one entity type.
pub struct TableSchema<T> {
    table: String,
    primary_key: PrimaryKey<T>,
    columns: Vec<Column<T>>,
    select_sql: Option<String>,
    create_sql: Option<String>,
}

impl<T> TableSchema<T> {
    /// Create a new table schema.
    pub fn new(table: impl Into<String>, primary_key: PrimaryKey<T>) -> Self {
        Self {
            table: table.into(),
            primary_key,
            columns: Vec::new(),
            select_sql: None,
            create_sql: None,
        }
    }

    /// Builder-style method to add a column.
    pub fn with_column(mut self, column: Column<T>) -> Self {
        self.columns.push(column);
        self
    }

    /// Replace the default `SELECT * ... ORDER BY` used to load the table.
    pub fn with_select(mut self, sql: impl Into<String>) -> Self {
        self.select_sql = Some(sql.into());
        self
    }

    /// Replace the generated `CREATE TABLE` statement.
    pub fn with_create(mut self, sql: impl Into<String>) -> Self {
        self.create_sql = Some(sql.into());
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        self.primary_key.name()
    }

    pub fn columns(&self) -> &[Column<T>] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column<T>> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn select_sql(&self) -> Option<&str> {
        self.select_sql.as_deref()
    }

    pub fn create_sql(&self) -> Option<&str> {
        self.create_sql.as_deref()
    }

    /// Columns declared to mirror another table's field.
    pub fn mirrors(&self) -> impl Iterator<Item = (&Column<T>, &Mirror)> {
        self.columns
            .iter()
            .filter_map(|c| c.mirror.as_ref().map(|m| (c, m)))
    }

    /// Insertable column names and values, in declaration order.
    pub fn fields_of(&self, record: &T) -> Vec<(String, Value)> {
        self.columns
            .iter()
            .filter(|c| c.insertable)
            .map(|c| (c.name.clone(), c.value_of(record)))
            .collect()
    }

    /// Every column name and value, read-only columns included.
    ///
    /// Used to mirror rows into the local store, which must hold the values
    /// the remote computed.
    pub fn all_fields_of(&self, record: &T) -> Vec<(String, Value)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.value_of(record)))
            .collect()
    }

    pub fn primary_key_of(&self, record: &T) -> Option<i32> {
        (self.primary_key.get)(record)
    }

    /// The record's primary key; a record without one is a caller bug.
    pub fn require_primary_key(&self, record: &T) -> Result<i32> {
        self.primary_key_of(record).ok_or_else(|| {
            Error::invariant(format!(
                "record of table '{}' has no primary key",
                self.table
            ))
        })
    }

    pub fn set_primary_key(&self, record: &mut T, id: i32) {
        (self.primary_key.set)(record, id)
    }

    /// Check identifiers and links before any SQL is built from them.
    pub fn validate(&self) -> Result<()> {
        for name in std::iter::once(&self.table)
            .chain(std::iter::once(&self.primary_key.name))
            .chain(self.columns.iter().map(|c| &c.name))
        {
            if !is_identifier(name) {
                return Err(Error::invariant(format!(
                    "'{name}' is not a valid identifier in table '{}'",
                    self.table
                )));
            }
        }

        for (i, column) in self.columns.iter().enumerate() {
            let duplicate = column.name.eq_ignore_ascii_case(&self.primary_key.name)
                || self.columns[..i]
                    .iter()
                    .any(|c| c.name.eq_ignore_ascii_case(&column.name));
            if duplicate {
                return Err(Error::invariant(format!(
                    "column '{}' declared twice in table '{}'",
                    column.name, self.table
                )));
            }

            if let Some(mirror) = &column.mirror {
                if mirror.table.eq_ignore_ascii_case(&self.table) {
                    return Err(Error::invariant(format!(
                        "column '{}' of '{}' cannot mirror its own table",
                        column.name, self.table
                    )));
                }
                if !is_identifier(&mirror.table) || !is_identifier(&mirror.column) {
                    return Err(Error::invariant(format!(
                        "column '{}' mirrors invalid target '{}.{}'",
                        column.name, mirror.table, mirror.column
                    )));
                }
            }
        }

        Ok(())
    }
}

impl<T: Default> TableSchema<T> {
    /// Build a record from a result row.
    ///
    /// Columns missing from the row keep their default value, which lets
    /// custom select statements return a subset of the table.
    pub fn from_row(&self, row: &Row, codec: &dyn ValueCodec) -> Result<T> {
        let key = self.primary_key.name();
        let raw_id = row.get(key).ok_or_else(|| {
            Error::invariant(format!(
                "row of table '{}' has no '{key}' column",
                self.table
            ))
        })?;
        let id: i32 = codec
            .decode(raw_id.clone(), ColumnType::Int)
            .and_then(Value::decode)
            .map_err(|e| e.in_column(key))?;

        let mut record = T::default();
        (self.primary_key.set)(&mut record, id);

        for column in &self.columns {
            let Some(raw) = row.get(&column.name) else {
                continue;
            };
            let value = codec
                .decode(raw.clone(), column.column_type)
                .map_err(|e| e.in_column(&column.name))?;
            column.assign(&mut record, value)?;
        }

        Ok(record)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
