//! Decoded query output.

use bytes::Bytes;

use super::protocol::FieldDescription;

/// Column descriptor, as announced by RowDescription.
pub type Field = FieldDescription;

/// One data row. `None` is SQL NULL, distinct from an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub values: Vec<Option<Bytes>>,
}

impl Row {
    /// Raw bytes of column `idx`; `None` for NULL or out of range.
    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// Whether column `idx` is NULL.
    pub fn is_null(&self, idx: usize) -> bool {
        matches!(self.values.get(idx), Some(None))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of a query execution.
///
/// Every row holds exactly `fields.len()` values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resultset {
    /// Column descriptions
    pub fields: Vec<Field>,
    /// Row data
    pub rows: Vec<Row>,
    /// Command tag (e.g., "SELECT 5")
    pub result: String,
}

impl Resultset {
    pub(crate) fn with_fields(fields: Vec<Field>) -> Self {
        Self {
            fields,
            rows: Vec::new(),
            result: String::new(),
        }
    }

    /// Index of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}
