use parking_lot::FairMutex;
use serde_yaml::{Mapping, Value};
use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info};

/// Keys of the sticky state the coordinator reads or writes
pub mod keys {
    /// id of the most recently claimed but unfinished parameter set
    pub const LAST_TEST: &str = "last-test";
    pub const PERFORMED_BY: &str = "performed-by";
    /// -1 means unlimited
    pub const NUM_OF_RUNS: &str = "num-of-runs";
    pub const COMPUTER_STRENGTH: &str = "computer-strength";

    pub const RESERVED: [&str; 4] = [LAST_TEST, PERFORMED_BY, NUM_OF_RUNS, COMPUTER_STRENGTH];
}

#[derive(Error, Debug)]
pub enum StickyError {
    #[error("Failed to access sticky state file")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize sticky state")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to write sticky state as JSON")]
    Json(#[from] serde_json::Error),
    #[error("Sticky state in {0:?} is not a key-value mapping")]
    NotAMapping(PathBuf),
}

/// Small persistent key-value store local to one worker
pub trait StickyStore: Debug + Send {
    /// value of `key`, `None` if missing or null
    fn get_value(&self, key: &str) -> Option<Value>;

    fn has_value(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    /// set `key` and persist immediately
    fn update(&mut self, key: &str, value: Value) -> Result<(), StickyError>;
}

/// render a scalar sticky value as text, `None` for null and nested values
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// interpret a sticky value as an integer, numeric strings are accepted
pub fn scalar_to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn lookup(values: &Mapping, key: &str) -> Option<Value> {
    values.get(key).filter(|value| !value.is_null()).cloned()
}

/// On-disk format of a sticky state file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickyFormat {
    Yaml,
    Json,
}

impl StickyFormat {
    /// `.json` files and files holding a JSON object stay JSON
    fn detect(path: &Path, contents: Option<&str>) -> Self {
        let json_extension = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
        let json_contents = contents.is_some_and(|text| text.trim_start().starts_with('{'));

        if json_extension || json_contents {
            Self::Json
        } else {
            Self::Yaml
        }
    }
}

/// Sticky state kept in a YAML or JSON file.
///
/// The whole file is rewritten on every update, in the format it was read in.
/// Keys the runner does not know about are preserved.
#[derive(Debug)]
pub struct FileSticky {
    path: PathBuf,
    format: StickyFormat,
    values: Mapping,
}

impl FileSticky {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StickyError> {
        let path = path.into();
        let contents = fs::read_to_string(&path)?;

        let values = match serde_yaml::from_str::<Value>(&contents)? {
            Value::Mapping(values) => values,
            Value::Null => Mapping::new(),
            _ => return Err(StickyError::NotAMapping(path)),
        };

        let format = StickyFormat::detect(&path, Some(&contents));
        debug!(path = ?path, keys = values.len(), format = ?format, "Loaded sticky state");

        Ok(Self {
            path,
            format,
            values,
        })
    }

    /// write a fresh sticky file containing all reserved keys
    pub fn create(
        path: impl Into<PathBuf>,
        performed_by: Option<&str>,
    ) -> Result<Self, StickyError> {
        let mut values = Mapping::new();

        for key in keys::RESERVED {
            values.insert(Value::from(key), Value::Null);
        }

        if let Some(name) = performed_by {
            values.insert(Value::from(keys::PERFORMED_BY), Value::from(name));
        }

        let path = path.into();
        let sticky = Self {
            format: StickyFormat::detect(&path, None),
            path,
            values,
        };
        sticky.save()?;

        info!(path = ?sticky.path, "Created sticky state file");

        Ok(sticky)
    }

    /// forget the outstanding `last-test`
    pub fn reset(&mut self) -> Result<(), StickyError> {
        self.update(keys::LAST_TEST, Value::Null)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> StickyFormat {
        self.format
    }

    fn save(&self) -> Result<(), StickyError> {
        let contents = match self.format {
            StickyFormat::Yaml => serde_yaml::to_string(&self.values)?,
            StickyFormat::Json => {
                let mut contents = serde_json::to_string_pretty(&self.values)?;
                contents.push('\n');
                contents
            }
        };

        fs::write(&self.path, contents)?;

        Ok(())
    }
}

impl StickyStore for FileSticky {
    fn get_value(&self, key: &str) -> Option<Value> {
        lookup(&self.values, key)
    }

    fn update(&mut self, key: &str, value: Value) -> Result<(), StickyError> {
        debug!(key = key, value = ?value, "Updating sticky state");
        self.values.insert(Value::from(key), value);

        self.save()
    }
}

/// In-process sticky state, clones share the same values
#[derive(Debug, Clone, Default)]
pub struct MemorySticky {
    values: Arc<FairMutex<Mapping>>,
}

impl MemorySticky {
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let mut mapping = Mapping::new();

        for (key, value) in values {
            mapping.insert(Value::from(key), value);
        }

        Self {
            values: Arc::new(FairMutex::new(mapping)),
        }
    }
}

impl StickyStore for MemorySticky {
    fn get_value(&self, key: &str) -> Option<Value> {
        lookup(&self.values.lock(), key)
    }

    fn update(&mut self, key: &str, value: Value) -> Result<(), StickyError> {
        self.values.lock().insert(Value::from(key), value);

        Ok(())
    }
}
