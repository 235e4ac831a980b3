use serde::{Deserialize, Serialize};
use std::{fs, io::Error, os::unix::fs::MetadataExt, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        fs::metadata(path)
            .map(|metadata| (metadata.mode() & 0o111) != 0)
            .map_err(ConfigErrors::MetadataNotFound)
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Config is invalid")]
    InvalidConfig(#[from] serde_yaml::Error),
    #[error("Config failed preflight checks")]
    FailedPreflight,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // where the sweep table lives, `Delimited: {...}` rather than a `!Delimited` tag
    #[serde(
        alias = "db",
        alias = "database",
        with = "serde_yaml::with::singleton_map"
    )]
    pub table: TableConfig,
    // worker local sticky state, optional
    #[serde(default)]
    pub sticky: Option<PathBuf>,
    // what to run for every claimed parameter set
    #[serde(default)]
    pub executor: Option<ExecutorConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub enum TableConfig {
    Delimited {
        path: PathBuf,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
    SQLite {
        path: PathBuf,
        #[serde(default = "default_table_name")]
        table: String,
    },
    Memory,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ExecutorConfig {
    pub exec: PathBuf,
    // `{field}` is replaced by the value of `field` in the claimed parameter set
    #[serde(default)]
    pub params: Vec<String>,
    // seconds, no timeout if absent
    #[serde(default)]
    pub timeout: Option<u64>,
    // write `<id>_settings.txt` into the working directory before running
    #[serde(default)]
    pub settings_file: bool,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        if !path.is_file() {
            error!(path = ?path, "Config file not found");

            return Err(ConfigErrors::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)?;

        Ok(serde_yaml::from_str(&contents)?)
    }

    /// log every problem with the config, returns true if any was found
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        match &self.table {
            TableConfig::Delimited { path, delimiter } => {
                if !delimiter.is_ascii() {
                    error!("table.Delimited.delimiter ({delimiter:?}) must be a single ASCII character");
                    contains_error = true;
                }

                if !path.is_file() {
                    error!(
                        "table.Delimited.path ({}) is not a file",
                        path.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
            TableConfig::SQLite { path, table } => {
                if table.is_empty() {
                    error!("table.SQLite.table must not be empty");
                    contains_error = true;
                }

                if !path.is_file() {
                    warn!(
                        "table.SQLite.path ({}) does not exist yet, an empty database will be created",
                        path.to_string_lossy()
                    );
                }
            }
            TableConfig::Memory => {
                warn!("table.Memory is not shared with other workers and starts empty");
            }
        }

        if let Some(ref sticky) = self.sticky {
            if !sticky.is_file() {
                error!(
                    "sticky ({}) is not a file, create it with `paramsweep sticky create`",
                    sticky.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if let Some(ref executor) = self.executor {
            match check_executable(&executor.exec) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "executor.exec ({}) is not executable",
                        executor.exec.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to determine if executor.exec ({}) is an executable: {e}",
                        executor.exec.to_string_lossy()
                    );
                    contains_error = true;
                }
            }

            if executor.timeout == Some(0) {
                error!("executor.timeout cannot be 0, leave it out to run without a timeout");
                contains_error = true;
            }

            if let Some(ref dir) = executor.working_dir {
                if !dir.is_dir() {
                    error!(
                        "executor.working-dir ({}) is not a directory",
                        dir.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        contains_error
    }
}

fn default_delimiter() -> char {
    ','
}

fn default_table_name() -> String {
    "parameters".to_owned()
}
