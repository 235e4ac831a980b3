use super::{delimited::DelimitedFile, memory::Grid, ConnectionError, Value};
use std::path::Path;
use tracing::info;

pub const SAMPLE_HEADER: [&str; 7] = ["id", "start-time", "end-time", "status", "a", "b", "c"];

/// The three row demo sweep, `t1` is already finished
pub fn sample_grid() -> Grid {
    let rows: [[&str; 7]; 3] = [
        ["t1", "2019-09-06 17:23", "2019-09-06 17:36", "finished", "2", "4", "6"],
        ["t2", "", "", "", "10", "10", ""],
        ["t3", "", "", "", "10", "-10", ""],
    ];

    Grid {
        header: SAMPLE_HEADER.iter().map(|name| name.to_string()).collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().copied().map(Value::from_cell).collect())
            .collect(),
    }
}

/// write the sample sweep as a delimited file, overwriting `path`
pub fn sample_table(path: &Path, delimiter: u8) -> Result<DelimitedFile, ConnectionError> {
    let table = DelimitedFile::new(path, delimiter);
    table.write(&sample_grid())?;

    info!(path = ?path, "Created sample table");

    Ok(table)
}

/// write the sample sweep into a SQLite table, replacing the table if it exists
#[cfg(feature = "sqlite")]
pub fn sample_sqlite(
    path: &Path,
    table: &str,
) -> Result<super::sqlite::SqliteTable, ConnectionError> {
    let sqlite = super::sqlite::SqliteTable::load(path, table)?;
    sqlite.drop_table()?;
    sqlite.create(&SAMPLE_HEADER)?;

    for record in sample_grid().records()? {
        sqlite.insert_row(&record)?;
    }

    info!(path = ?path, table = table, "Created sample table");

    Ok(sqlite)
}
