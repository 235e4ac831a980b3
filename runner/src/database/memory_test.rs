use super::{
    memory::{Grid, MemoryTable},
    ParameterRecord, TableStore, Value,
};

fn table() -> MemoryTable {
    let records = [
        ParameterRecord::from_fields([("id", "t1"), ("status", ""), ("a", "2")]).unwrap(),
        ParameterRecord::from_fields([("id", "t2"), ("status", ""), ("a", "10")]).unwrap(),
    ];

    MemoryTable::from_records(records.iter())
}

#[test]
pub fn clones_share_rows() {
    let table = table();
    let other = table.clone();

    let mut record = table.get_table().unwrap().remove(0);
    record.set_status("in progress");
    assert!(table.update_row(0, &record).unwrap());

    assert_eq!(
        other.get_table().unwrap()[0].status(),
        &Value::from("in progress")
    );
}

#[test]
pub fn update_row_extends_schema() {
    let table = table();

    let mut record = table.get_table().unwrap().remove(1);
    record.set("comments", "extended");
    assert!(table.update_row(1, &record).unwrap());

    assert_eq!(table.fields().unwrap(), vec!["id", "status", "a", "comments"]);

    let records = table.get_table().unwrap();
    assert_eq!(records[0].get("comments"), Some(&Value::Empty));
    assert_eq!(records[1].get("comments"), Some(&Value::from("extended")));
}

#[test]
pub fn out_of_range_rows_are_rejected() {
    let table = table();
    let record = table.get_table().unwrap().remove(0);

    assert!(!table.update_row(5, &record).unwrap());
    assert!(!table.update_cell(2, "status", Value::from("x")).unwrap());
    assert_eq!(table.snapshot().rows.len(), 2);
}

#[test]
pub fn row_index_lookup() {
    let table = table();

    assert_eq!(table.get_row_index("id", &Value::from("t2")).unwrap(), Some(1));
    assert_eq!(table.get_row_index("id", &Value::from("t9")).unwrap(), None);
    assert_eq!(table.get_row_index("missing", &Value::from("t1")).unwrap(), None);
    assert_eq!(table.get_row_index("status", &Value::Empty).unwrap(), Some(0));
}

#[test]
pub fn update_cell_only_touches_one_cell() {
    let table = table();

    assert!(table.update_cell(1, "status", Value::from("adding")).unwrap());

    let grid = table.snapshot();
    assert_eq!(
        grid,
        Grid {
            header: vec!["id".into(), "status".into(), "a".into()],
            rows: vec![
                vec![Value::from("t1"), Value::Empty, Value::from("2")],
                vec![Value::from("t2"), Value::from("adding"), Value::from("10")],
            ],
        }
    );
}
