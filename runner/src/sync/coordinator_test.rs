use super::{
    coordinator::{Coordinator, CoordinatorError},
    sticky::{keys, FileSticky, MemorySticky, StickyStore},
};
use crate::database::{
    delimited::DelimitedFile, memory::MemoryTable, record::TIMESTAMP_FORMAT, sample::sample_table,
    status, ConnectionError, Field, ParameterRecord, TableStore, Value,
};
use chrono::{Local, NaiveDateTime};
use proptest::prelude::*;
use serde_yaml::Value as YamlValue;
use tempfile::TempDir;

fn record(fields: &[(&str, &str)]) -> ParameterRecord {
    ParameterRecord::from_fields(fields.iter().copied()).unwrap()
}

fn table(records: &[ParameterRecord]) -> MemoryTable {
    MemoryTable::from_records(records.iter())
}

fn full_table() -> MemoryTable {
    let header = ["id", "start-time", "end-time", "status", "performed-by", "comments", "a"];
    let rows = [
        ["t1", "", "", "", "", "", "1"],
        ["t2", "", "", "", "", "previous;", "2"],
        ["t3", "", "", "", "", "", "3"],
    ];

    table(
        &rows
            .iter()
            .map(|row| record(&header.iter().copied().zip(row.iter().copied()).collect::<Vec<_>>()))
            .collect::<Vec<_>>(),
    )
}

fn sticky(last_test: Option<&str>) -> MemorySticky {
    MemorySticky::with_values([(
        keys::LAST_TEST,
        last_test.map(YamlValue::from).unwrap_or(YamlValue::Null),
    )])
}

fn statuses(table: &MemoryTable) -> Vec<String> {
    table
        .get_table()
        .unwrap()
        .iter()
        .map(|record| record.status().to_string())
        .collect()
}

fn assert_recent(value: Option<&Value>) {
    let text = value.unwrap().to_string();
    let stamped = NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT).unwrap();
    let elapsed = Local::now().naive_local() - stamped;

    assert!(elapsed.num_seconds().abs() < 15, "{text} is not recent");
}

#[test]
pub fn scenario_claims_in_table_order() {
    let table = table(&[
        record(&[("id", "t1"), ("status", ""), ("a", "2"), ("b", "4"), ("c", "")]),
        record(&[("id", "t2"), ("status", ""), ("a", "10"), ("b", "10"), ("c", "")]),
    ]);
    let mut coordinator = Coordinator::new(table.clone(), None);

    let first = coordinator.claim_next().unwrap().unwrap();
    assert_eq!(
        first,
        record(&[("id", "t1"), ("status", "in progress"), ("a", "2"), ("b", "4"), ("c", "")])
    );

    let second = coordinator.claim_next().unwrap().unwrap();
    assert_eq!(
        second,
        record(&[("id", "t2"), ("status", "in progress"), ("a", "10"), ("b", "10"), ("c", "")])
    );

    assert_eq!(coordinator.claim_next().unwrap(), None);
    assert_eq!(statuses(&table), vec!["in progress", "in progress"]);
}

#[test]
pub fn claim_stamps_only_present_fields() {
    let table = full_table();
    let mut coordinator = Coordinator::new(table.clone(), None).with_performed_by("ben");

    let claimed = coordinator.claim_next().unwrap().unwrap();
    assert!(claimed.has_id("t1"));
    assert_recent(claimed.field(Field::StartTime));
    assert_eq!(claimed.field(Field::PerformedBy), Some(&Value::from("ben")));
    assert_eq!(claimed.field(Field::EndTime), Some(&Value::Empty));

    let stored = table.get_table().unwrap().remove(0);
    assert_eq!(stored, claimed);

    let bare = self::table(&[record(&[("id", "t1"), ("status", "")])]);
    let claimed = Coordinator::new(bare.clone(), None)
        .with_performed_by("ben")
        .claim_next()
        .unwrap()
        .unwrap();

    assert_eq!(claimed.len(), 2);
    assert_eq!(bare.fields().unwrap(), vec!["id", "status"]);
}

#[test]
pub fn capability_filter_skips_stronger_records() {
    let table = table(&[
        record(&[("id", "t1"), ("status", ""), ("computer-strength", "5")]),
        record(&[("id", "t2"), ("status", ""), ("computer-strength", "1")]),
    ]);
    let mut coordinator = Coordinator::new(table.clone(), None).with_min_strength(Some(1));

    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t2"));
    assert_eq!(coordinator.claim_next().unwrap(), None);
    assert_eq!(statuses(&table), vec!["", "in progress"]);

    let mut unlimited = Coordinator::new(table.clone(), None);
    assert!(unlimited.claim_next().unwrap().unwrap().has_id("t1"));
}

#[test]
pub fn capability_filter_reads_sticky_strength() {
    let table = table(&[
        record(&[("id", "t1"), ("status", ""), ("computer-strength", "5")]),
        record(&[("id", "t2"), ("status", ""), ("computer-strength", "")]),
        record(&[("id", "t3"), ("status", ""), ("computer-strength", "fast")]),
    ]);
    let sticky = MemorySticky::with_values([(keys::COMPUTER_STRENGTH, YamlValue::from(5))]);
    let mut coordinator = Coordinator::new(table, Some(Box::new(sticky)));

    assert_eq!(coordinator.min_strength(), Some(5));
    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t1"));
    coordinator.mark_successful("t1").unwrap().unwrap();
    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t2"));
    coordinator.mark_successful("t2").unwrap().unwrap();
    // unparsable strength is never claimable
    assert_eq!(coordinator.claim_next().unwrap(), None);
}

#[test]
pub fn sticky_resume_takes_precedence() {
    let table = table(&[
        record(&[("id", "t1"), ("status", "")]),
        record(&[("id", "t2"), ("status", "in progress")]),
    ]);
    let mut coordinator = Coordinator::new(table.clone(), Some(Box::new(sticky(Some("t2")))));

    let claimed = coordinator.claim_next().unwrap().unwrap();
    assert!(claimed.has_id("t2"));
    assert_eq!(claimed.status(), &Value::from(status::IN_PROGRESS));
    assert_eq!(statuses(&table), vec!["", "in progress"]);
}

#[test]
pub fn sticky_resume_skips_successful() {
    let table = table(&[
        record(&[("id", "t1"), ("status", "")]),
        record(&[("id", "t2"), ("status", "successful")]),
    ]);
    let sticky = sticky(Some("t2"));
    let mut coordinator = Coordinator::new(table.clone(), Some(Box::new(sticky.clone())));

    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t1"));
    assert_eq!(sticky.get_value(keys::LAST_TEST), Some(YamlValue::from("t1")));
}

#[test]
pub fn sticky_resume_is_reissued_on_every_call() {
    let table = table(&[
        record(&[("id", "t1"), ("status", "in progress")]),
        record(&[("id", "t2"), ("status", "")]),
    ]);
    let mut coordinator = Coordinator::new(table, Some(Box::new(sticky(Some("t1")))));

    // the sticky pointer is only cleared by mark_successful
    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t1"));
    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t1"));

    coordinator.mark_successful("t1").unwrap().unwrap();
    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t2"));
}

#[test]
pub fn claim_records_sticky_last_test() {
    let sticky = sticky(None);
    let mut coordinator = Coordinator::new(full_table(), Some(Box::new(sticky.clone())));

    assert!(!sticky.has_value(keys::LAST_TEST));
    coordinator.claim_next().unwrap().unwrap();
    assert_eq!(sticky.get_value(keys::LAST_TEST), Some(YamlValue::from("t1")));
}

#[test]
pub fn empty_sticky_id_is_ignored() {
    let table = table(&[
        record(&[("id", ""), ("status", "in progress")]),
        record(&[("id", "t2"), ("status", "")]),
    ]);
    let mut coordinator = Coordinator::new(table, Some(Box::new(sticky(Some("")))));

    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t2"));
}

#[test]
pub fn mark_successful_clears_sticky() {
    let table = full_table();
    let sticky = sticky(None);
    let mut coordinator = Coordinator::new(table.clone(), Some(Box::new(sticky.clone())));

    coordinator.claim_next().unwrap().unwrap();
    let claimed = coordinator.claim_next().unwrap().unwrap();
    assert!(claimed.has_id("t1"), "sticky t1 is reissued until it is resolved");

    let done = coordinator.mark_successful("t1").unwrap().unwrap();
    assert_eq!(done.status(), &Value::from(status::SUCCESSFUL));
    assert_recent(done.field(Field::EndTime));
    assert_eq!(sticky.get_value(keys::LAST_TEST), None);
    assert_eq!(table.get_table().unwrap().remove(0), done);
}

#[test]
pub fn mark_successful_clears_sticky_even_if_not_found() {
    let sticky = sticky(Some("t1"));
    let mut coordinator = Coordinator::new(full_table(), Some(Box::new(sticky.clone())));

    assert_eq!(coordinator.mark_successful("t9").unwrap(), None);
    assert!(!sticky.has_value(keys::LAST_TEST));
}

#[test]
pub fn mark_failed_appends_comments() {
    let table = full_table();
    let mut coordinator = Coordinator::new(table.clone(), None);

    coordinator.mark_failed("t2", "boom").unwrap().unwrap();
    let failed = coordinator.mark_failed("t2", "boom").unwrap().unwrap();

    assert_eq!(failed.status(), &Value::from(status::FAILED));
    assert_eq!(
        failed.field(Field::Comments),
        Some(&Value::from("previous; failed{ boom }; failed{ boom };"))
    );
    assert_recent(failed.field(Field::EndTime));
    assert_eq!(table.get_table().unwrap().remove(1), failed);
}

#[test]
pub fn mark_failed_without_comments_field() {
    let table = table(&[record(&[("id", "t1"), ("status", "in progress")])]);
    let mut coordinator = Coordinator::new(table.clone(), None);

    let failed = coordinator.mark_failed("t1", "").unwrap().unwrap();
    assert_eq!(failed, record(&[("id", "t1"), ("status", "failed")]));
    assert_eq!(table.fields().unwrap(), vec!["id", "status"]);
}

#[test]
pub fn failed_sticky_record_is_retried() {
    let table = full_table();
    let sticky = sticky(None);
    let mut coordinator = Coordinator::new(table.clone(), Some(Box::new(sticky.clone())));

    let claimed = coordinator.claim_next().unwrap().unwrap();
    coordinator.mark_failed("t1", "crash").unwrap().unwrap();
    assert_eq!(sticky.get_value(keys::LAST_TEST), Some(YamlValue::from("t1")));

    let retried = coordinator.claim_next().unwrap().unwrap();
    assert_eq!(retried.id(), claimed.id());
    assert_eq!(retried.status(), &Value::from(status::IN_PROGRESS));
}

#[test]
pub fn superseded_failed_record_is_stuck() {
    let table = full_table();
    let sticky = sticky(None);
    let mut coordinator = Coordinator::new(table.clone(), Some(Box::new(sticky.clone())));

    coordinator.claim_next().unwrap().unwrap();
    coordinator.mark_failed("t1", "crash").unwrap().unwrap();

    // another process moved the sticky pointer on
    let mut other = sticky.clone();
    other.update(keys::LAST_TEST, YamlValue::from("t2")).unwrap();
    coordinator.mark_successful("t2").unwrap().unwrap();

    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t3"));
    coordinator.mark_successful("t3").unwrap().unwrap();
    assert_eq!(coordinator.claim_next().unwrap(), None);
    assert_eq!(statuses(&table), vec!["failed", "successful", "successful"]);
}

#[test]
pub fn update_status_sets_verbatim() {
    let table = full_table();
    let mut coordinator = Coordinator::new(table.clone(), None);

    let claimed = coordinator.claim_next().unwrap().unwrap();
    let updated = coordinator.update_status("t1", "adding").unwrap().unwrap();

    assert_eq!(updated.status(), &Value::from("adding"));
    assert_eq!(updated.field(Field::StartTime), claimed.field(Field::StartTime));
    assert_eq!(statuses(&table), vec!["adding", "", ""]);

    // custom states never re-enter the general pass
    assert!(coordinator.claim_next().unwrap().unwrap().has_id("t2"));
}

#[test]
pub fn unknown_ids_are_not_found() {
    let table = full_table();
    let mut coordinator = Coordinator::new(table.clone(), None);

    assert_eq!(coordinator.update_status("t9", "adding").unwrap(), None);
    assert_eq!(coordinator.mark_successful("t9").unwrap(), None);
    assert_eq!(coordinator.mark_failed("t9", "boom").unwrap(), None);
    assert_eq!(statuses(&table), vec!["", "", ""]);
}

#[test]
pub fn duplicate_ids_resolve_to_first_match() {
    let table = table(&[
        record(&[("id", "t1"), ("status", "in progress")]),
        record(&[("id", "t1"), ("status", "in progress")]),
    ]);
    let mut coordinator = Coordinator::new(table.clone(), None);

    coordinator.mark_successful("t1").unwrap().unwrap();
    assert_eq!(statuses(&table), vec!["successful", "in progress"]);
}

#[test]
pub fn run_budget_stops_claims() {
    let table = full_table();
    let sticky = MemorySticky::with_values([(keys::NUM_OF_RUNS, YamlValue::from(2))]);
    let mut coordinator = Coordinator::new(table.clone(), Some(Box::new(sticky)));

    assert_eq!(coordinator.max_runs(), Some(2));
    assert!(coordinator.claim_next().unwrap().is_some());
    coordinator.mark_successful("t1").unwrap().unwrap();
    assert!(coordinator.claim_next().unwrap().is_some());
    assert_eq!(coordinator.claim_next().unwrap(), None);
    assert_eq!(coordinator.runs_done(), 2);
    assert_eq!(statuses(&table), vec!["successful", "in progress", ""]);
}

#[test]
pub fn negative_run_budget_is_unlimited() {
    let sticky = MemorySticky::with_values([
        (keys::NUM_OF_RUNS, YamlValue::from(-1)),
        (keys::PERFORMED_BY, YamlValue::from("ben")),
    ]);
    let coordinator = Coordinator::new(full_table(), Some(Box::new(sticky)));

    assert_eq!(coordinator.max_runs(), None);
    assert_eq!(coordinator.min_strength(), None);
    assert_eq!(coordinator.performed_by(), "ben");
}

#[test]
pub fn empty_claims_still_count_runs() {
    let table = table(&[record(&[("id", "t1"), ("status", "successful")])]);
    let mut coordinator = Coordinator::new(table, None).with_max_runs(Some(2));

    assert_eq!(coordinator.claim_next().unwrap(), None);
    assert_eq!(coordinator.claim_next().unwrap(), None);
    assert_eq!(coordinator.runs_done(), 2);
    assert_eq!(coordinator.claim_next().unwrap(), None);
    assert_eq!(coordinator.runs_done(), 2);
}

#[test]
pub fn backend_failures_propagate() {
    let dir = TempDir::new().unwrap();
    let missing = DelimitedFile::new(dir.path().join("missing.csv"), b',');
    let mut coordinator = Coordinator::new(missing, None);

    assert!(matches!(
        coordinator.claim_next(),
        Err(CoordinatorError::Backend(ConnectionError::Delimited(_)))
    ));
    assert!(matches!(
        coordinator.mark_failed("t1", "boom"),
        Err(CoordinatorError::Backend(_))
    ));
}

#[test]
pub fn delimited_file_with_sticky_file() {
    let dir = TempDir::new().unwrap();
    let table = sample_table(&dir.path().join("sweep.csv"), b',').unwrap();
    let sticky_path = dir.path().join("sticky.yaml");
    FileSticky::create(&sticky_path, Some("ben")).unwrap();

    let mut coordinator = Coordinator::new(
        table.clone(),
        Some(Box::new(FileSticky::open(&sticky_path).unwrap())),
    );

    let claimed = coordinator.claim_next().unwrap().unwrap();
    assert!(claimed.has_id("t2"));
    assert_recent(claimed.field(Field::StartTime));
    assert_eq!(
        FileSticky::open(&sticky_path).unwrap().get_value(keys::LAST_TEST),
        Some(YamlValue::from("t2"))
    );
    drop(coordinator);

    // a restarted worker resumes the same parameter set
    let mut restarted = Coordinator::new(
        table.clone(),
        Some(Box::new(FileSticky::open(&sticky_path).unwrap())),
    );
    assert!(restarted.claim_next().unwrap().unwrap().has_id("t2"));
    restarted.mark_successful("t2").unwrap().unwrap();

    assert_eq!(
        FileSticky::open(&sticky_path).unwrap().get_value(keys::LAST_TEST),
        None
    );

    let records = table.get_table().unwrap();
    assert_eq!(records[1].status(), &Value::from(status::SUCCESSFUL));
    assert_recent(records[1].field(Field::EndTime));
    assert!(restarted.claim_next().unwrap().unwrap().has_id("t3"));
}

proptest! {
    #[test]
    fn sequential_claims_are_distinct(count in 0usize..12, taken in proptest::collection::vec(any::<bool>(), 12)) {
        let records = (0..count)
            .map(|index| {
                let id = format!("t{index}");
                let status = if taken[index] { "successful" } else { "" };
                record(&[("id", id.as_str()), ("status", status)])
            })
            .collect::<Vec<_>>();
        let open = taken.iter().take(count).filter(|taken| !**taken).count();
        let table = table(&records);
        let mut coordinator = Coordinator::new(table.clone(), None);
        let mut seen = Vec::new();

        for _ in 0..open {
            let claimed = coordinator.claim_next().unwrap();
            prop_assert!(claimed.is_some());
            let claimed = claimed.unwrap();
            prop_assert_eq!(claimed.status(), &Value::from(status::IN_PROGRESS));
            prop_assert!(!seen.contains(&claimed.id().to_string()));
            seen.push(claimed.id().to_string());
        }

        prop_assert_eq!(coordinator.claim_next().unwrap(), None);
        prop_assert!(statuses(&table).iter().all(|status| !status.is_empty()));
    }
}
