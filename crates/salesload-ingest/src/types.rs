//! Core types for the bulk-load engine

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::LoadError;

/// Scalar value stored in one row position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Decimal(BigDecimal),
    Date(NaiveDate),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Column type this value satisfies; `None` for NULL, which fits any column
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(ColumnType::Text),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Decimal(_) => Some(ColumnType::Decimal),
            Value::Date(_) => Some(ColumnType::Date),
        }
    }

    /// Text form used by bulk-copy encoders. NULL has no text form.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(Cow::Borrowed(s)),
            Value::Integer(i) => Some(Cow::Owned(i.to_string())),
            Value::Decimal(d) => Some(Cow::Owned(d.to_string())),
            Value::Date(d) => Some(Cow::Owned(d.format("%Y-%m-%d").to_string())),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<BigDecimal> for Value {
    fn from(value: BigDecimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Declared type of a target column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Decimal,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Decimal)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Date)
    }
}

/// Target table shape: name, positional columns and optional conflict key.
///
/// Construction validates the shape, so a descriptor in hand always has a
/// non-empty name, unique columns and a conflict key drawn from its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<Column>,
    conflict_key: Option<Vec<String>>,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<Column>,
        conflict_key: Option<Vec<String>>,
    ) -> Result<Self, LoadError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LoadError::config("table name cannot be empty"));
        }
        if columns.is_empty() {
            return Err(LoadError::config(format!("table '{}' has no columns", name)));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.trim().is_empty() {
                return Err(LoadError::config(format!(
                    "table '{}' has a column with an empty name",
                    name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(LoadError::config(format!(
                    "table '{}' declares column '{}' twice",
                    name, column.name
                )));
            }
        }

        if let Some(ref key) = conflict_key {
            if key.is_empty() {
                return Err(LoadError::config(format!(
                    "table '{}' has an empty conflict key; use None for append-only tables",
                    name
                )));
            }
            if let Some(missing) = key.iter().find(|k| !seen.contains(k.as_str())) {
                return Err(LoadError::config(format!(
                    "conflict key column '{}' is not a column of table '{}'",
                    missing, name
                )));
            }
        }

        Ok(Self {
            name,
            columns,
            conflict_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn conflict_key(&self) -> Option<&[String]> {
        self.conflict_key.as_deref()
    }

    /// Check that a row has this table's arity and positional types
    pub fn check_row(&self, row: &Row) -> Result<(), LoadError> {
        if row.len() != self.arity() {
            return Err(LoadError::config(format!(
                "row for table '{}' has {} values, expected {}",
                self.name,
                row.len(),
                self.arity()
            )));
        }

        for (column, value) in self.columns.iter().zip(row.values()) {
            if let Some(actual) = value.column_type() {
                if actual != column.column_type {
                    return Err(LoadError::config(format!(
                        "column '{}.{}' expects {} but row holds {}",
                        self.name,
                        column.name,
                        column.column_type.as_str(),
                        actual.as_str()
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn check_rows(&self, rows: &[Row]) -> Result<(), LoadError> {
        rows.iter().try_for_each(|row| self.check_row(row))
    }

    /// Keep the first row seen for each conflict key. Unkeyed tables keep
    /// every row.
    pub fn first_per_key<'r>(&self, rows: &'r [Row]) -> Vec<&'r Row> {
        let Some(key) = self.conflict_key() else {
            return rows.iter().collect();
        };

        let positions: Vec<usize> = key
            .iter()
            .filter_map(|k| self.column_names().position(|c| c == k))
            .collect();

        let mut seen = HashSet::new();
        rows.iter()
            .filter(|row| {
                let key: Vec<Option<&Value>> = positions.iter().map(|&i| row.values().get(i)).collect();
                seen.insert(key)
            })
            .collect()
    }
}

/// Immutable row tuple. Clones share the underlying values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row(Arc<[Value]>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Build a [`Row`] from anything convertible into [`Value`]
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::types::Row::new(vec![$($crate::types::Value::from($value)),*])
    };
}

/// One table's deduplicated rows, as handed over by the extraction stage
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub descriptor: TableDescriptor,
    pub rows: Vec<Row>,
}

impl RecordBatch {
    pub fn new(descriptor: TableDescriptor, rows: Vec<Row>) -> Self {
        Self { descriptor, rows }
    }

    pub fn table(&self) -> &str {
        self.descriptor.name()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Identity of a load task within one run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub stage: usize,
    pub table: String,
    pub chunk: usize,
    pub chunks: usize,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}/{}]", self.table, self.chunk + 1, self.chunks)
    }
}

/// One bounded piece of a table's rows, loaded by a single loader call
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub id: TaskId,
    pub descriptor: Arc<TableDescriptor>,
    pub rows: Vec<Row>,
}

impl LoadTask {
    pub fn table(&self) -> &str {
        self.descriptor.name()
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        self.descriptor.check_rows(&self.rows)
    }
}

/// Group of tasks that may run concurrently
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub tasks: Vec<LoadTask>,
}

impl Stage {
    pub fn new(name: impl Into<String>, tasks: Vec<LoadTask>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }

    /// Distinct table names in submission order
    pub fn tables(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.tasks
            .iter()
            .map(LoadTask::table)
            .filter(|t| seen.insert(*t))
            .collect()
    }
}
