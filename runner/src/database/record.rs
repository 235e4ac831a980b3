use serde::{ser::SerializeMap, Serialize, Serializer};
use std::{borrow::Cow, collections::BTreeMap, fmt};
use thiserror::Error;

/// Local-clock format used for `start-time` and `end-time`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Well known values of the `status` field. An empty status means "not started",
/// anything not listed here is a custom, operator chosen state.
pub mod status {
    pub const IN_PROGRESS: &str = "in progress";
    pub const SUCCESSFUL: &str = "successful";
    pub const FAILED: &str = "failed";
}

/// current local time formatted with `TIMESTAMP_FORMAT`
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Required field `{0}` is missing")]
    MissingField(&'static str),
    #[error("Field `{field}` holds `{value}` which is not an integer")]
    Unparsable { field: &'static str, value: String },
}

/// A single scalar cell of the sweep table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Empty,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// map a raw cell from a text based backend, blank cells become `Empty`
    pub fn from_cell(cell: &str) -> Self {
        if cell.is_empty() {
            Self::Empty
        } else {
            Self::Text(cell.to_owned())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// interpret the value as an integer, `Ok(None)` for empty cells
    pub fn as_integer(&self) -> Result<Option<i64>, String> {
        match self {
            Self::Empty => Ok(None),
            Self::Integer(value) => Ok(Some(*value)),
            Self::Float(value) if value.fract() == 0.0 => Ok(Some(*value as i64)),
            Self::Float(value) => Err(value.to_string()),
            Self::Text(text) => {
                let trimmed = text.trim();

                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    trimmed.parse().map(Some).map_err(|_| text.clone())
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::from_cell(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value)
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Fields the coordinator knows about. Everything else is passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Id,
    Status,
    StartTime,
    EndTime,
    PerformedBy,
    Comments,
    ComputerStrength,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Id,
        Field::Status,
        Field::StartTime,
        Field::EndTime,
        Field::PerformedBy,
        Field::Comments,
        Field::ComputerStrength,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Status => "status",
            Self::StartTime => "start-time",
            Self::EndTime => "end-time",
            Self::PerformedBy => "performed-by",
            Self::Comments => "comments",
            Self::ComputerStrength => "computer-strength",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the sweep table.
///
/// `id` and `status` are always present. The other recognized fields are only
/// present if the backing table has a column for them, unknown columns are kept
/// in `extra`. `order` remembers the column order of the table so a record can be
/// written back exactly as it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    id: Value,
    status: Value,
    optional: BTreeMap<Field, Value>,
    extra: Vec<(String, Value)>,
    order: Vec<String>,
}

impl ParameterRecord {
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut id = None;
        let mut status = None;
        let mut record = Self {
            id: Value::Empty,
            status: Value::Empty,
            optional: BTreeMap::new(),
            extra: Vec::new(),
            order: Vec::new(),
        };

        for (name, value) in fields {
            let name = name.into();
            let value = value.into();

            match Field::from_name(&name) {
                Some(Field::Id) => id = Some(value),
                Some(Field::Status) => status = Some(value),
                Some(field) => {
                    record.optional.insert(field, value);
                }
                None => match record.extra.iter_mut().find(|(key, _)| *key == name) {
                    Some((_, slot)) => *slot = value,
                    None => record.extra.push((name.clone(), value)),
                },
            }

            if !record.order.contains(&name) {
                record.order.push(name);
            }
        }

        record.id = id.ok_or(RecordError::MissingField(Field::Id.name()))?;
        record.status = status.ok_or(RecordError::MissingField(Field::Status.name()))?;

        Ok(record)
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    pub fn status(&self) -> &Value {
        &self.status
    }

    /// true if the id renders to the given string, ids are compared as text
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_text() == id
    }

    /// schema presence query for a recognized field
    pub fn has_field(&self, field: Field) -> bool {
        match field {
            Field::Id | Field::Status => true,
            other => self.optional.contains_key(&other),
        }
    }

    pub fn field(&self, field: Field) -> Option<&Value> {
        match field {
            Field::Id => Some(&self.id),
            Field::Status => Some(&self.status),
            other => self.optional.get(&other),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match Field::from_name(name) {
            Some(field) => self.field(field),
            None => self
                .extra
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value),
        }
    }

    /// set a field by name, appending it to the column order if it is new
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();

        match Field::from_name(name) {
            Some(Field::Id) => self.id = value,
            Some(Field::Status) => self.status = value,
            Some(field) => {
                self.optional.insert(field, value);
            }
            None => match self.extra.iter_mut().find(|(key, _)| key == name) {
                Some((_, slot)) => *slot = value,
                None => self.extra.push((name.to_owned(), value)),
            },
        }

        if !self.order.iter().any(|key| key == name) {
            self.order.push(name.to_owned());
        }
    }

    pub fn set_status(&mut self, status: impl Into<Value>) {
        self.status = status.into();
    }

    /// overwrite a recognized field only if the record already carries it,
    /// returns whether the field was present
    pub fn stamp(&mut self, field: Field, value: impl Into<Value>) -> bool {
        if !self.has_field(field) {
            return false;
        }

        match field {
            Field::Id => self.id = value.into(),
            Field::Status => self.status = value.into(),
            other => {
                self.optional.insert(other, value.into());
            }
        }

        true
    }

    /// append to `comments` if the record has that field
    pub fn append_comment(&mut self, text: &str) -> bool {
        match self.optional.get_mut(&Field::Comments) {
            Some(comments) => {
                let mut current = comments.as_text().into_owned();
                current.push_str(text);
                *comments = Value::from(current);

                true
            }
            None => false,
        }
    }

    /// minimum worker strength required for this record, `None` if unrestricted
    pub fn computer_strength(&self) -> Result<Option<i64>, RecordError> {
        match self.optional.get(&Field::ComputerStrength) {
            Some(value) => value.as_integer().map_err(|value| RecordError::Unparsable {
                field: Field::ComputerStrength.name(),
                value,
            }),
            None => Ok(None),
        }
    }

    /// column names in table order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// all fields in table order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order
            .iter()
            .filter_map(|name| self.get(name).map(|value| (name.as_str(), value)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Serialize for ParameterRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;

        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }

        map.end()
    }
}
