pub mod delimited;
pub mod memory;
pub mod record;
pub mod sample;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use record::{status, Field, ParameterRecord, RecordError, Value};

use crate::config::TableConfig;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to access table file")]
    Io(#[from] std::io::Error),
    #[error("Failed to read or write delimited file")]
    Delimited(#[from] csv::Error),
    #[cfg(feature = "sqlite")]
    #[error("SQLite Error")]
    SQLite(rusqlite::Error),
    #[error("Malformed record: {0}")]
    Record(#[from] RecordError),
    #[error("Table has no header")]
    MissingHeader,
    #[error("Row on line {line} has {cells} cells but the header only {columns}")]
    RaggedRow {
        line: u64,
        cells: usize,
        columns: usize,
    },
    #[error("Delimiter {0:?} is not a single byte character")]
    InvalidDelimiter(char),
    #[error("Table backend not supported: {0}")]
    Unsupported(&'static str),
}

/// Narrow contract every sweep table backend has to satisfy.
///
/// Rows are addressed by their zero-based position in `get_table`. There is no
/// locking or compare-and-swap, every write is assumed to be visible to the next
/// read immediately.
pub trait TableStore {
    /// establish a session with the backend, returns whether it is usable
    fn connect(&mut self) -> Result<bool, ConnectionError>;

    /// full snapshot of the table in row order
    fn get_table(&self) -> Result<Vec<ParameterRecord>, ConnectionError>;

    /// column names in canonical order
    fn fields(&self) -> Result<Vec<String>, ConnectionError>;

    /// replace a whole row, fields unknown to the table extend its schema
    fn update_row(&self, row_index: usize, record: &ParameterRecord)
        -> Result<bool, ConnectionError>;

    /// replace a single cell
    fn update_cell(&self, row_index: usize, field: &str, value: Value)
        -> Result<bool, ConnectionError>;

    /// first row whose `field` equals `value`
    fn get_row_index(&self, field: &str, value: &Value) -> Result<Option<usize>, ConnectionError>;
}

/// All table backends, selected by `TableConfig`
#[derive(Debug)]
pub enum TableAdapters {
    Delimited(delimited::DelimitedFile),
    Memory(memory::MemoryTable),
    #[cfg(feature = "sqlite")]
    SQLite(sqlite::SqliteTable),
}

impl TableAdapters {
    pub fn load(config: &TableConfig) -> Result<Self, ConnectionError> {
        debug!(config = ?config, "Loading table adapter");

        match config {
            TableConfig::Delimited { path, delimiter } => {
                let byte = u8::try_from(*delimiter)
                    .ok()
                    .filter(u8::is_ascii)
                    .ok_or(ConnectionError::InvalidDelimiter(*delimiter))?;

                Ok(Self::Delimited(delimited::DelimitedFile::new(
                    path.clone(),
                    byte,
                )))
            }
            TableConfig::Memory => Ok(Self::Memory(memory::MemoryTable::default())),
            #[cfg(feature = "sqlite")]
            TableConfig::SQLite { path, table } => {
                Ok(Self::SQLite(sqlite::SqliteTable::load(path, table)?))
            }
            #[cfg(not(feature = "sqlite"))]
            TableConfig::SQLite { .. } => Err(ConnectionError::Unsupported("sqlite")),
        }
    }
}

impl TableStore for TableAdapters {
    fn connect(&mut self) -> Result<bool, ConnectionError> {
        match self {
            Self::Delimited(table) => table.connect(),
            Self::Memory(table) => table.connect(),
            #[cfg(feature = "sqlite")]
            Self::SQLite(table) => table.connect(),
        }
    }

    fn get_table(&self) -> Result<Vec<ParameterRecord>, ConnectionError> {
        match self {
            Self::Delimited(table) => table.get_table(),
            Self::Memory(table) => table.get_table(),
            #[cfg(feature = "sqlite")]
            Self::SQLite(table) => table.get_table(),
        }
    }

    fn fields(&self) -> Result<Vec<String>, ConnectionError> {
        match self {
            Self::Delimited(table) => table.fields(),
            Self::Memory(table) => table.fields(),
            #[cfg(feature = "sqlite")]
            Self::SQLite(table) => table.fields(),
        }
    }

    fn update_row(
        &self,
        row_index: usize,
        record: &ParameterRecord,
    ) -> Result<bool, ConnectionError> {
        match self {
            Self::Delimited(table) => table.update_row(row_index, record),
            Self::Memory(table) => table.update_row(row_index, record),
            #[cfg(feature = "sqlite")]
            Self::SQLite(table) => table.update_row(row_index, record),
        }
    }

    fn update_cell(
        &self,
        row_index: usize,
        field: &str,
        value: Value,
    ) -> Result<bool, ConnectionError> {
        match self {
            Self::Delimited(table) => table.update_cell(row_index, field, value),
            Self::Memory(table) => table.update_cell(row_index, field, value),
            #[cfg(feature = "sqlite")]
            Self::SQLite(table) => table.update_cell(row_index, field, value),
        }
    }

    fn get_row_index(&self, field: &str, value: &Value) -> Result<Option<usize>, ConnectionError> {
        match self {
            Self::Delimited(table) => table.get_row_index(field, value),
            Self::Memory(table) => table.get_row_index(field, value),
            #[cfg(feature = "sqlite")]
            Self::SQLite(table) => table.get_row_index(field, value),
        }
    }
}

#[cfg(test)]
mod memory_test;
