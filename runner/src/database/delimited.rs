use super::{memory::Grid, ConnectionError, ParameterRecord, TableStore, Value};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Table stored as a delimited text file with the header in the first row.
///
/// Every write reads the whole file, changes it in memory and rewrites it. A
/// crash in the middle of a write can leave a truncated file behind.
#[derive(Debug, Clone)]
pub struct DelimitedFile {
    path: PathBuf,
    delimiter: u8,
}

impl DelimitedFile {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// load the whole file
    pub fn read(&self) -> Result<Grid, ConnectionError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;

        let header = reader
            .headers()?
            .iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();

        if header.is_empty() || header.iter().all(String::is_empty) {
            return Err(ConnectionError::MissingHeader);
        }

        let mut grid = Grid::new(header);

        for record in reader.records() {
            let record = record?;

            // short rows are padded on read, long ones would lose cells on the next rewrite
            if record.len() > grid.header.len() {
                return Err(ConnectionError::RaggedRow {
                    line: record.position().map_or(0, |position| position.line()),
                    cells: record.len(),
                    columns: grid.header.len(),
                });
            }

            grid.rows.push(record.iter().map(Value::from_cell).collect());
        }

        trace!(path = ?self.path, rows = grid.rows.len(), "Read delimited file");

        Ok(grid)
    }

    /// replace the file contents with `grid`
    pub fn write(&self, grid: &Grid) -> Result<(), ConnectionError> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(&self.path)?;

        writer.write_record(&grid.header)?;

        let width = grid.header.len();
        for row in grid.rows.iter() {
            writer.write_record(
                (0..width).map(|column| row.get(column).map(Value::to_string).unwrap_or_default()),
            )?;
        }

        writer.flush()?;

        debug!(path = ?self.path, rows = grid.rows.len(), "Rewrote delimited file");

        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut Grid) -> bool) -> Result<bool, ConnectionError> {
        let mut grid = self.read()?;

        if !change(&mut grid) {
            return Ok(false);
        }

        self.write(&grid)?;

        Ok(true)
    }
}

impl TableStore for DelimitedFile {
    fn connect(&mut self) -> Result<bool, ConnectionError> {
        Ok(self.path.is_file())
    }

    fn get_table(&self) -> Result<Vec<ParameterRecord>, ConnectionError> {
        self.read()?.records()
    }

    fn fields(&self) -> Result<Vec<String>, ConnectionError> {
        Ok(self.read()?.header)
    }

    fn update_row(
        &self,
        row_index: usize,
        record: &ParameterRecord,
    ) -> Result<bool, ConnectionError> {
        self.modify(|grid| grid.replace_row(row_index, record))
    }

    fn update_cell(
        &self,
        row_index: usize,
        field: &str,
        value: Value,
    ) -> Result<bool, ConnectionError> {
        self.modify(|grid| grid.replace_cell(row_index, field, value))
    }

    fn get_row_index(&self, field: &str, value: &Value) -> Result<Option<usize>, ConnectionError> {
        Ok(self.read()?.row_index(field, value))
    }
}
