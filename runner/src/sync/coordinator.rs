use super::sticky::{keys, scalar_to_integer, scalar_to_string, StickyError, StickyStore};
use crate::database::{
    record::timestamp, status, ConnectionError, Field, ParameterRecord, TableStore, Value,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Table backend failed")]
    Backend(#[from] ConnectionError),
    #[error("Sticky state failed")]
    Sticky(#[from] StickyError),
    #[error("Table backend rejected the write to row {row}")]
    WriteRejected { row: usize },
}

/// Hands out parameter sets from a shared table and records their outcome.
///
/// The table is fetched in full on every call and written back with a single
/// row or cell update. There is no lock spanning the read and the write, two
/// workers polling at the same time can claim the same parameter set.
///
/// `Ok(None)` is the "nothing to do" answer of every operation: no claimable
/// parameter set (or the run budget is spent) for `claim_next`, an unknown id
/// for the others.
#[derive(Debug)]
pub struct Coordinator<T: TableStore> {
    table: T,
    sticky: Option<Box<dyn StickyStore>>,
    performed_by: String,
    max_runs: Option<u64>,
    runs_done: u64,
    min_strength: Option<i64>,
}

impl<T: TableStore> Coordinator<T> {
    /// create a coordinator, pre-loading operator settings from the sticky state
    pub fn new(table: T, sticky: Option<Box<dyn StickyStore>>) -> Self {
        let mut coordinator = Self {
            table,
            sticky: None,
            performed_by: String::new(),
            max_runs: None,
            runs_done: 0,
            min_strength: None,
        };

        if let Some(ref store) = sticky {
            if let Some(value) = store.get_value(keys::PERFORMED_BY) {
                match scalar_to_string(&value) {
                    Some(name) => coordinator.performed_by = name,
                    None => warn!(value = ?value, "Ignoring non-scalar performed-by"),
                }
            }

            if let Some(value) = store.get_value(keys::NUM_OF_RUNS) {
                match scalar_to_integer(&value) {
                    Some(runs) => coordinator.max_runs = u64::try_from(runs).ok(),
                    None => warn!(value = ?value, "Ignoring non-integer num-of-runs"),
                }
            }

            if let Some(value) = store.get_value(keys::COMPUTER_STRENGTH) {
                match scalar_to_integer(&value) {
                    Some(strength) => coordinator.min_strength = Some(strength),
                    None => warn!(value = ?value, "Ignoring non-integer computer-strength"),
                }
            }
        }

        coordinator.sticky = sticky;

        debug!(
            performed_by = %coordinator.performed_by,
            max_runs = ?coordinator.max_runs,
            min_strength = ?coordinator.min_strength,
            "Created coordinator"
        );

        coordinator
    }

    /// override the operator name
    pub fn with_performed_by(mut self, performed_by: impl Into<String>) -> Self {
        self.performed_by = performed_by.into();
        self
    }

    /// override the run budget, `None` is unlimited
    pub fn with_max_runs(mut self, max_runs: Option<u64>) -> Self {
        self.max_runs = max_runs;
        self
    }

    /// override the worker strength, `None` is unlimited
    pub fn with_min_strength(mut self, min_strength: Option<i64>) -> Self {
        self.min_strength = min_strength;
        self
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn sticky(&self) -> Option<&dyn StickyStore> {
        self.sticky.as_deref()
    }

    pub fn performed_by(&self) -> &str {
        &self.performed_by
    }

    pub fn max_runs(&self) -> Option<u64> {
        self.max_runs
    }

    pub fn runs_done(&self) -> u64 {
        self.runs_done
    }

    pub fn min_strength(&self) -> Option<i64> {
        self.min_strength
    }

    /// Claim the next parameter set.
    ///
    /// The sticky `last-test` is offered first as long as it is not successful,
    /// on every call. Otherwise the first record with an empty status that this
    /// worker is strong enough for is taken.
    pub fn claim_next(&mut self) -> Result<Option<ParameterRecord>, CoordinatorError> {
        if let Some(max_runs) = self.max_runs {
            if self.runs_done >= max_runs {
                info!(runs_done = self.runs_done, "Run budget spent, no more parameter sets");

                return Ok(None);
            }
        }

        self.runs_done += 1;
        debug!(runs_done = self.runs_done, "Requesting next parameter set");

        let mut records = self.table.get_table()?;
        debug!(count = records.len(), "Retrieved parameter sets");

        if let Some(last_test) = self.last_test() {
            info!(id = %last_test, "Checking sticky last-test");

            if let Some(index) = records.iter().position(|record| {
                record.has_id(&last_test) && record.status().as_text() != status::SUCCESSFUL
            }) {
                let mut record = records.swap_remove(index);
                self.begin(&mut record);
                self.write_row(index, &record)?;

                info!(id = %last_test, "Resumed sticky parameter set");

                return Ok(Some(record));
            }
        }

        let mut found = None;

        for (index, record) in records.iter().enumerate() {
            if !record.status().is_empty() {
                continue;
            }

            match record.computer_strength() {
                Ok(Some(required)) if self.min_strength.is_some_and(|own| own < required) => {
                    debug!(
                        id = %record.id(),
                        required = required,
                        "Skipping parameter set, worker not strong enough"
                    );
                    continue;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(id = %record.id(), "Skipping parameter set: {error}");
                    continue;
                }
            }

            found = Some(index);
            break;
        }

        let Some(index) = found else {
            info!("No more parameter sets to run");

            return Ok(None);
        };

        let mut record = records.swap_remove(index);
        self.begin(&mut record);
        self.write_row(index, &record)?;

        if let Some(ref mut sticky) = self.sticky {
            sticky.update(
                keys::LAST_TEST,
                serde_yaml::Value::from(record.id().as_text().into_owned()),
            )?;
        }

        info!(id = %record.id(), "Claimed parameter set");

        Ok(Some(record))
    }

    /// Set the status of `id` to an arbitrary value, only the status cell is written
    pub fn update_status(
        &mut self,
        id: &str,
        new_status: &str,
    ) -> Result<Option<ParameterRecord>, CoordinatorError> {
        let Some((index, mut record)) = self.find(id)? else {
            return Ok(None);
        };

        record.set_status(new_status);

        if !self
            .table
            .update_cell(index, Field::Status.name(), Value::from(new_status))?
        {
            error!(row = index, "Failed to update status cell");

            return Err(CoordinatorError::WriteRejected { row: index });
        }

        info!(id = id, status = new_status, "Updated status");

        Ok(Some(record))
    }

    /// Mark `id` as successful. The sticky `last-test` is cleared before the
    /// table is touched.
    pub fn mark_successful(
        &mut self,
        id: &str,
    ) -> Result<Option<ParameterRecord>, CoordinatorError> {
        if let Some(ref mut sticky) = self.sticky {
            sticky.update(keys::LAST_TEST, serde_yaml::Value::Null)?;
        }

        let Some((index, mut record)) = self.find(id)? else {
            return Ok(None);
        };

        record.set_status(status::SUCCESSFUL);
        record.stamp(Field::EndTime, timestamp());
        self.write_row(index, &record)?;

        info!(id = id, "Marked parameter set as successful");

        Ok(Some(record))
    }

    /// Mark `id` as failed, appending the message to `comments` if present.
    /// The sticky state is left alone so the set is retried on the next claim.
    pub fn mark_failed(
        &mut self,
        id: &str,
        message: &str,
    ) -> Result<Option<ParameterRecord>, CoordinatorError> {
        let Some((index, mut record)) = self.find(id)? else {
            return Ok(None);
        };

        record.set_status(status::FAILED);
        record.stamp(Field::EndTime, timestamp());
        record.append_comment(&format!(" failed{{ {message} }};"));
        self.write_row(index, &record)?;

        info!(id = id, message = message, "Marked parameter set as failed");

        Ok(Some(record))
    }

    fn last_test(&self) -> Option<String> {
        self.sticky
            .as_ref()?
            .get_value(keys::LAST_TEST)
            .as_ref()
            .and_then(scalar_to_string)
            .filter(|id| !id.is_empty())
    }

    /// first row with a matching id
    fn find(&self, id: &str) -> Result<Option<(usize, ParameterRecord)>, CoordinatorError> {
        let mut records = self.table.get_table()?;

        match records.iter().position(|record| record.has_id(id)) {
            Some(index) => Ok(Some((index, records.swap_remove(index)))),
            None => {
                warn!(id = id, "Parameter set not found");

                Ok(None)
            }
        }
    }

    fn begin(&self, record: &mut ParameterRecord) {
        record.set_status(status::IN_PROGRESS);
        record.stamp(Field::StartTime, timestamp());
        record.stamp(Field::PerformedBy, self.performed_by.as_str());
    }

    fn write_row(&self, index: usize, record: &ParameterRecord) -> Result<(), CoordinatorError> {
        if self.table.update_row(index, record)? {
            Ok(())
        } else {
            error!(row = index, id = %record.id(), "Table backend rejected row update");

            Err(CoordinatorError::WriteRejected { row: index })
        }
    }
}
