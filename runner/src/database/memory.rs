use super::{ConnectionError, ParameterRecord, TableStore, Value};
use parking_lot::FairMutex;
use std::sync::Arc;

/// Rectangular table of cells aligned to a header.
///
/// Shared by the in-process and the delimited file backend, the latter loads a
/// `Grid` from disk, mutates it and writes it back as a whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Grid {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    pub fn records(&self) -> Result<Vec<ParameterRecord>, ConnectionError> {
        self.rows
            .iter()
            .map(|row| {
                ParameterRecord::from_fields(
                    self.header
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned().chain(std::iter::repeat(Value::Empty))),
                )
                .map_err(ConnectionError::from)
            })
            .collect()
    }

    pub fn push(&mut self, record: &ParameterRecord) {
        self.extend_header(record.names());
        let row = self.row_from(record);
        self.rows.push(row);
    }

    pub fn replace_row(&mut self, row_index: usize, record: &ParameterRecord) -> bool {
        if row_index >= self.rows.len() {
            return false;
        }

        self.extend_header(record.names());
        self.rows[row_index] = self.row_from(record);

        true
    }

    pub fn replace_cell(&mut self, row_index: usize, field: &str, value: Value) -> bool {
        if row_index >= self.rows.len() {
            return false;
        }

        let column = self.column(field);
        let width = self.header.len();
        let row = &mut self.rows[row_index];
        row.resize(width, Value::Empty);
        row[column] = value;

        true
    }

    pub fn row_index(&self, field: &str, value: &Value) -> Option<usize> {
        let column = self.header.iter().position(|name| name == field)?;
        let needle = value.as_text();

        self.rows.iter().position(|row| {
            row.get(column)
                .map_or(needle.is_empty(), |cell| cell.as_text() == needle)
        })
    }

    /// index of a column, appending it if it does not exist yet
    fn column(&mut self, field: &str) -> usize {
        match self.header.iter().position(|name| name == field) {
            Some(index) => index,
            None => {
                self.header.push(field.to_owned());
                self.header.len() - 1
            }
        }
    }

    fn extend_header<'a>(&mut self, names: impl Iterator<Item = &'a str>) {
        for name in names {
            self.column(name);
        }
    }

    /// cells of `record` in header order, missing fields become empty cells
    fn row_from(&self, record: &ParameterRecord) -> Vec<Value> {
        self.header
            .iter()
            .map(|name| record.get(name).cloned().unwrap_or_default())
            .collect()
    }
}

/// In-process table, clones share the same rows
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    inner: Arc<FairMutex<Grid>>,
}

impl MemoryTable {
    pub fn new(grid: Grid) -> Self {
        Self {
            inner: Arc::new(FairMutex::new(grid)),
        }
    }

    /// build a table from records, the header is the union of all field names
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ParameterRecord>) -> Self {
        let mut grid = Grid::default();

        for record in records {
            grid.push(record);
        }

        Self::new(grid)
    }

    pub fn snapshot(&self) -> Grid {
        self.inner.lock().clone()
    }
}

impl TableStore for MemoryTable {
    fn connect(&mut self) -> Result<bool, ConnectionError> {
        Ok(true)
    }

    fn get_table(&self) -> Result<Vec<ParameterRecord>, ConnectionError> {
        self.inner.lock().records()
    }

    fn fields(&self) -> Result<Vec<String>, ConnectionError> {
        Ok(self.inner.lock().header.clone())
    }

    fn update_row(
        &self,
        row_index: usize,
        record: &ParameterRecord,
    ) -> Result<bool, ConnectionError> {
        Ok(self.inner.lock().replace_row(row_index, record))
    }

    fn update_cell(
        &self,
        row_index: usize,
        field: &str,
        value: Value,
    ) -> Result<bool, ConnectionError> {
        Ok(self.inner.lock().replace_cell(row_index, field, value))
    }

    fn get_row_index(&self, field: &str, value: &Value) -> Result<Option<usize>, ConnectionError> {
        Ok(self.inner.lock().row_index(field, value))
    }
}
