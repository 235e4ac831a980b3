use super::{ExecutorError, Outcome, RunSummary};
use crate::{
    config::ExecutorConfig,
    database::{status, ParameterRecord, TableStore},
    sync::Coordinator,
};
use itertools::Itertools;
use std::{
    collections::BTreeSet,
    fs,
    path::PathBuf,
    process::{Command, Stdio},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

/// Executor that runs one parameter set at a time as a local child process
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    config: ExecutorConfig,
}

/// replace every `{field}` in `template` with the value of that field
pub fn substitute(template: &str, record: &ParameterRecord) -> String {
    record
        .iter()
        .fold(template.to_owned(), |current, (name, value)| {
            current.replace(&format!("{{{name}}}"), &value.as_text())
        })
}

/// `field:value` lines for every field of `record`
pub fn settings_contents(record: &ParameterRecord) -> String {
    let mut contents = record
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .join("\n");
    contents.push('\n');

    contents
}

impl LocalExecutor {
    pub fn load(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Claim and run parameter sets until the coordinator has nothing left.
    ///
    /// A failed parameter set stays the sticky `last-test` and is handed out
    /// again right away. If that happens within one loop the set is put back to
    /// `failed` and the loop stops, the next launch retries it.
    #[instrument(skip_all, level = "info")]
    pub fn execute<T: TableStore>(
        &self,
        coordinator: &mut Coordinator<T>,
    ) -> Result<RunSummary, ExecutorError> {
        let mut summary = RunSummary::default();
        let mut failed = BTreeSet::new();

        while let Some(record) = coordinator.claim_next()? {
            let id = record.id().as_text().into_owned();

            if failed.contains(&id) {
                warn!(
                    id = %id,
                    "Parameter set failed earlier in this run and was handed out again, stopping"
                );
                coordinator.update_status(&id, status::FAILED)?;

                break;
            }

            summary.claimed += 1;

            match self.run(&record) {
                Outcome::Success => {
                    coordinator.mark_successful(&id)?;
                    summary.successful += 1;
                }
                Outcome::Failure(message) => {
                    coordinator.mark_failed(&id, &message)?;
                    summary.failed += 1;
                    failed.insert(id);
                }
            }

            info!(
                claimed = summary.claimed,
                successful = summary.successful,
                failed = summary.failed,
                "Finished parameter set"
            );
        }

        info!("Done with processing");

        Ok(summary)
    }

    /// run the configured executable for a single parameter set
    #[instrument(skip_all, fields(id = %record.id()), level = "debug")]
    pub fn run(&self, record: &ParameterRecord) -> Outcome {
        if self.config.settings_file {
            let Some(path) = self.settings_path(record) else {
                warn!("Id cannot be used as a file name, not running");

                return Outcome::Failure(format!(
                    "id {} cannot be used in a settings file name",
                    record.id()
                ));
            };

            if let Err(e) = fs::write(&path, settings_contents(record)) {
                warn!(path = ?path, "Failed to write settings file: {e}");

                return Outcome::Failure(format!("failed to write settings file: {e}"));
            }

            debug!(path = ?path, "Wrote settings file");
        }

        let args = self
            .config
            .params
            .iter()
            .map(|param| substitute(param, record))
            .collect_vec();

        let mut command = Command::new(&self.config.exec);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        if let Some(ref dir) = self.config.working_dir {
            command.current_dir(dir);
        }

        debug!(exec = ?self.config.exec, args = ?args, "Spawning");
        let start = Instant::now();

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {:?}: {e}", self.config.exec);

                return Outcome::Failure(format!("failed to spawn: {e}"));
            }
        };

        let waited = match self.config.timeout {
            Some(seconds) => child.wait_timeout(Duration::from_secs(seconds)),
            None => child.wait().map(Some),
        };

        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                // child hasn't exited yet
                let seconds = self.config.timeout.unwrap_or_default();

                if let Err(e) = child.kill().and_then(|_| child.wait()) {
                    error!("Failed to kill timed out run: {e}");
                }
                warn!(timeout = seconds, "Killed parameter set run after timeout");

                return Outcome::Failure(format!("timed out after {seconds}s"));
            }
            Err(e) => {
                error!("Failed to wait for run: {e}");

                if let Err(e) = child.kill() {
                    debug!("Failed to kill run after wait error: {e}");
                }

                return Outcome::Failure(format!("failed to wait: {e}"));
            }
        };

        debug!(
            "Finished in {} ms | status: {}",
            start.elapsed().as_millis(),
            status.success()
        );

        if status.success() {
            Outcome::Success
        } else {
            Outcome::Failure(match status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_owned(),
            })
        }
    }

    /// `None` if the id would leave the working directory
    fn settings_path(&self, record: &ParameterRecord) -> Option<PathBuf> {
        let id = record.id().as_text();

        if id.contains(std::path::is_separator) {
            return None;
        }

        let name = format!("{id}_settings.txt");

        Some(match self.config.working_dir {
            Some(ref dir) => dir.join(name),
            None => PathBuf::from(name),
        })
    }
}
