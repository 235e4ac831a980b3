use super::{ConnectionError, ParameterRecord, TableStore, Value};
use parking_lot::{lock_api::ArcMutexGuard, FairMutex, RawFairMutex};
use rusqlite::{
    params, params_from_iter,
    types::{Value as SqlValue, ValueRef},
    Connection, OptionalExtension,
};
use std::{path::Path, sync::Arc};
use tracing::{debug, error, info};
use tracing_unwrap::ResultExt;

#[derive(Debug, Clone)]
/// Transparent, thread safe wrapper over a SQLite `Connection`
pub struct SharedConnection(Arc<FairMutex<Connection>>);

impl From<rusqlite::Error> for ConnectionError {
    fn from(error: rusqlite::Error) -> Self {
        ConnectionError::SQLite(error)
    }
}

impl SharedConnection {
    pub fn new(connection: Connection) -> Self {
        Self(Arc::new(FairMutex::new(connection)))
    }

    fn lock(&self) -> ArcMutexGuard<RawFairMutex, Connection> {
        self.0.lock_arc()
    }

    /// close the connection, all clones have to be dropped beforehand
    pub fn close(self) -> Result<(), ConnectionError> {
        let mut connection = Arc::try_unwrap(self.0).unwrap_or_log().into_inner();
        let mut counter = 0;

        while let Err((returned, error)) = connection.close() {
            counter += 1;
            connection = returned;
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                return Err(ConnectionError::SQLite(error));
            }
        }

        info!("Closed SQLite connection");

        Ok(())
    }
}

/// Sweep table stored in a single SQLite table.
///
/// Row positions follow `rowid` order. Columns are untyped so every cell keeps
/// the storage class it was written with.
#[derive(Debug, Clone)]
pub struct SqliteTable {
    connection: SharedConnection,
    table: String,
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Empty => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Float(value) => SqlValue::Real(*value),
        Value::Text(text) => SqlValue::Text(text.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Empty,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Float(value),
        ValueRef::Text(text) | ValueRef::Blob(text) => {
            Value::from(String::from_utf8_lossy(text).into_owned())
        }
    }
}

impl SqliteTable {
    pub fn load(path: &Path, table: &str) -> Result<Self, ConnectionError> {
        let connection = Connection::open(path)?;
        debug!(path = ?path, table = table, "Opened SQLite table");

        Ok(Self::from_connection(connection, table))
    }

    pub fn from_connection(connection: Connection, table: &str) -> Self {
        Self {
            connection: SharedConnection::new(connection),
            table: table.to_owned(),
        }
    }

    /// create the table with the given columns if it does not exist yet
    pub fn create(&self, header: &[&str]) -> Result<(), ConnectionError> {
        let columns = header.iter().map(|name| quote(name)).collect::<Vec<_>>();

        self.connection.lock().execute(
            &format!(
                "create table if not exists {} ({})",
                quote(&self.table),
                columns.join(", ")
            ),
            [],
        )?;

        info!(table = %self.table, "Applied SQL schema");

        Ok(())
    }

    /// drop the table with all its rows
    pub fn drop_table(&self) -> Result<(), ConnectionError> {
        self.connection
            .lock()
            .execute(&format!("drop table if exists {}", quote(&self.table)), [])?;

        info!(table = %self.table, "Dropped table");

        Ok(())
    }

    /// append a record as a new row
    pub fn insert_row(&self, record: &ParameterRecord) -> Result<(), ConnectionError> {
        self.ensure_columns(record.names())?;

        let names = record.names().map(quote).collect::<Vec<_>>();
        let placeholders = (1..=names.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>();

        self.connection.lock().execute(
            &format!(
                "insert into {} ({}) values ({})",
                quote(&self.table),
                names.join(", "),
                placeholders.join(", ")
            ),
            params_from_iter(record.iter().map(|(_, value)| to_sql(value))),
        )?;

        Ok(())
    }

    pub fn close(self) -> Result<(), ConnectionError> {
        self.connection.close()
    }

    fn rowid(&self, row_index: usize) -> Result<Option<i64>, ConnectionError> {
        Ok(self
            .connection
            .lock()
            .query_row(
                &format!(
                    "select rowid from {} order by rowid limit 1 offset ?1",
                    quote(&self.table)
                ),
                params![row_index as i64],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn ensure_columns<'a>(
        &self,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<(), ConnectionError> {
        let existing = self.fields()?;

        for name in names {
            if !existing.iter().any(|column| column == name) {
                self.connection.lock().execute(
                    &format!(
                        "alter table {} add column {}",
                        quote(&self.table),
                        quote(name)
                    ),
                    [],
                )?;

                info!(table = %self.table, column = name, "Extended table schema");
            }
        }

        Ok(())
    }
}

impl TableStore for SqliteTable {
    fn connect(&mut self) -> Result<bool, ConnectionError> {
        Ok(!self.fields()?.is_empty())
    }

    fn get_table(&self) -> Result<Vec<ParameterRecord>, ConnectionError> {
        let header = self.fields()?;
        let connection = self.connection.lock();
        let mut statement = connection.prepare(&format!(
            "select * from {} order by rowid",
            quote(&self.table)
        ))?;
        let mut rows = statement.query([])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(header.len());

            for (index, name) in header.iter().enumerate() {
                cells.push((name.clone(), from_sql(row.get_ref(index)?)));
            }

            records.push(ParameterRecord::from_fields(cells)?);
        }

        Ok(records)
    }

    fn fields(&self) -> Result<Vec<String>, ConnectionError> {
        let connection = self.connection.lock();
        let mut statement =
            connection.prepare(&format!("pragma table_info({})", quote(&self.table)))?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(names)
    }

    fn update_row(
        &self,
        row_index: usize,
        record: &ParameterRecord,
    ) -> Result<bool, ConnectionError> {
        let Some(rowid) = self.rowid(row_index)? else {
            return Ok(false);
        };

        self.ensure_columns(record.names())?;

        let assignments = record
            .names()
            .enumerate()
            .map(|(index, name)| format!("{} = ?{}", quote(name), index + 1))
            .collect::<Vec<_>>();
        let values = record
            .iter()
            .map(|(_, value)| to_sql(value))
            .chain(std::iter::once(SqlValue::Integer(rowid)));

        let changed = self.connection.lock().execute(
            &format!(
                "update {} set {} where rowid = ?{}",
                quote(&self.table),
                assignments.join(", "),
                assignments.len() + 1
            ),
            params_from_iter(values),
        )?;

        debug!(row = row_index, rowid = rowid, "Updated row");

        Ok(changed == 1)
    }

    fn update_cell(
        &self,
        row_index: usize,
        field: &str,
        value: Value,
    ) -> Result<bool, ConnectionError> {
        let Some(rowid) = self.rowid(row_index)? else {
            return Ok(false);
        };

        self.ensure_columns(std::iter::once(field))?;

        let changed = self.connection.lock().execute(
            &format!(
                "update {} set {} = ?1 where rowid = ?2",
                quote(&self.table),
                quote(field)
            ),
            params![to_sql(&value), rowid],
        )?;

        Ok(changed == 1)
    }

    fn get_row_index(&self, field: &str, value: &Value) -> Result<Option<usize>, ConnectionError> {
        if !self.fields()?.iter().any(|column| column == field) {
            return Ok(None);
        }

        let connection = self.connection.lock();
        let mut statement = connection.prepare(&format!(
            "select {} from {} order by rowid",
            quote(field),
            quote(&self.table)
        ))?;
        let mut rows = statement.query([])?;
        let needle = value.as_text();
        let mut index = 0;

        while let Some(row) = rows.next()? {
            if from_sql(row.get_ref(0)?).as_text() == needle {
                return Ok(Some(index));
            }

            index += 1;
        }

        Ok(None)
    }
}
