// End-to-end lifecycle of a tracked record: registration, saves, deletes,
// point-in-time lookups and diffs.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use record_history::{
    modified_fields, Change, FieldDescriptor, FieldValue, HistoricalRecords, HistoryOptions,
    HistoryType, Record, RecordSchema, Result, SaveEvent, SchemaCatalog, Trackable,
};
use rusqlite::Connection;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct Item {
    id: i64,
    name: String,
    price: f64,
    code: String,
}

impl Trackable for Item {
    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("price", self.price)
            .with("code", self.code.as_str())
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Item {
            id: record.integer("id")?,
            name: record.text("name")?,
            price: record.real("price")?,
            code: record.text("code")?,
        })
    }
}

fn item_schema() -> RecordSchema {
    RecordSchema::new("Item", "inventory.models")
        .field(FieldDescriptor::auto("id"))
        .field(FieldDescriptor::text("name"))
        .field(FieldDescriptor::real("price"))
        .field(FieldDescriptor::text("code").unique())
}

fn setup(options: HistoryOptions) -> (Connection, Arc<HistoricalRecords>) {
    let mut catalog = SchemaCatalog::new();
    let history = catalog.register(&item_schema(), "history", options).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    catalog.install(&conn).unwrap();
    (conn, history)
}

fn t(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
}

fn item(id: i64, name: &str) -> Item {
    Item {
        id,
        name: name.to_string(),
        price: 2.5,
        code: format!("SKU-{}", id),
    }
}

fn save(history: &HistoricalRecords, conn: &Connection, item: &Item, event: SaveEvent) -> Option<i64> {
    history
        .record_change(conn, &item.to_record(), Change::Saved(event))
        .unwrap()
}

#[test]
fn test_creation_always_historizes() {
    let (conn, history) = setup(HistoryOptions::new());

    for id in 1..=5 {
        save(&history, &conn, &item(id, "new"), SaveEvent::created());
    }

    for id in 1..=5 {
        let entries = history.for_id(&conn, id).all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].history_type, HistoryType::Created);
    }
}

#[test]
fn test_noop_save_is_idempotent() {
    let (conn, history) = setup(HistoryOptions::new());
    let record = item(1, "steady");

    save(&history, &conn, &record, SaveEvent::created());
    for _ in 0..3 {
        assert_eq!(save(&history, &conn, &record, SaveEvent::updated()), None);
    }

    assert_eq!(history.for_id(&conn, 1).count().unwrap(), 1);
}

#[test]
fn test_each_field_change_triggers_one_entry() {
    let (conn, history) = setup(HistoryOptions::new());
    let mut current = item(1, "base");
    save(&history, &conn, &current, SaveEvent::created());

    current.name = "renamed".to_string();
    save(&history, &conn, &current, SaveEvent::updated());
    current.price = 3.75;
    save(&history, &conn, &current, SaveEvent::updated());
    current.code = "SKU-X".to_string();
    save(&history, &conn, &current, SaveEvent::updated());

    let manager = history.for_id(&conn, 1);
    let entries = manager.all().unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries[..3].iter().all(|e| e.history_type == HistoryType::Changed));
    assert_eq!(manager.most_recent_as::<Item>().unwrap(), current);
}

#[test]
fn test_allow_list_limits_tracking() {
    let (conn, history) = setup(HistoryOptions::new().fields(["name"]));
    let mut current = item(1, "tracked");
    save(&history, &conn, &current, SaveEvent::created());

    current.price = 99.0;
    assert_eq!(save(&history, &conn, &current, SaveEvent::updated()), None);

    current.name = "still tracked".to_string();
    assert!(save(&history, &conn, &current, SaveEvent::updated()).is_some());

    let snapshot = history.for_id(&conn, 1).most_recent().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(!snapshot.contains("price"));
}

#[test]
fn test_ordering_is_monotonic() {
    let (conn, history) = setup(HistoryOptions::new());
    let mut current = item(1, "v0");
    save(&history, &conn, &current, SaveEvent::created().at(t(0)));
    for step in 1..=5 {
        current.name = format!("v{}", step);
        save(&history, &conn, &current, SaveEvent::updated().at(t(step * 10)));
    }

    let manager = history.for_id(&conn, 1);
    let mut ids: Vec<i64> = manager.all().unwrap().iter().map(|e| e.history_id).collect();
    ids.reverse();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let mut last_seen = -1;
    for minute in (0..=60).step_by(5) {
        let name = manager.as_of(t(minute)).unwrap().text("name").unwrap();
        let version: i64 = name.trim_start_matches('v').parse().unwrap();
        assert!(version >= last_seen);
        last_seen = version;
    }
    assert_eq!(last_seen, 5);
}

#[test]
fn test_deletion_is_terminal_for_as_of() {
    let (conn, history) = setup(HistoryOptions::new());
    let record = item(1, "doomed");
    save(&history, &conn, &record, SaveEvent::created().at(t(0)));
    history
        .record_change(&conn, &record.to_record(), Change::Deleted { at: Some(t(10)) })
        .unwrap();

    let manager = history.for_id(&conn, 1);
    for minute in [10, 11, 60, 600] {
        assert!(manager.as_of(t(minute)).unwrap_err().is_already_deleted());
    }
    assert_eq!(manager.most_recent_as::<Item>().unwrap(), record);
    assert_eq!(manager.latest().unwrap().unwrap().history_type, HistoryType::Deleted);
}

#[test]
fn test_latest_snapshot_round_trips() {
    let (conn, history) = setup(HistoryOptions::new());
    let live = Item {
        id: 7,
        name: "Precise".to_string(),
        price: 0.1 + 0.2,
        code: "SKU-7".to_string(),
    };
    save(&history, &conn, &live, SaveEvent::created());

    let manager = history.for_id(&conn, 7);
    assert_eq!(manager.most_recent().unwrap(), live.to_record());

    let entry = manager.latest().unwrap().unwrap();
    assert_eq!(Item::from_record(&entry.history_object()).unwrap(), live);
}

#[test]
fn test_scenario_create_update_noop_delete() {
    let (conn, history) = setup(HistoryOptions::new().fields(["name"]));
    let a = Record::new().with("id", 1).with("name", "A");
    let b = Record::new().with("id", 1).with("name", "B");

    history
        .record_change(&conn, &a, Change::Saved(SaveEvent::created().at(t(0))))
        .unwrap();
    let manager = history.for_id(&conn, 1);
    assert_eq!(manager.count().unwrap(), 1);
    assert_eq!(manager.latest().unwrap().unwrap().history_type.code(), "+");

    history
        .record_change(&conn, &b, Change::Saved(SaveEvent::updated().at(t(1))))
        .unwrap();
    let second = manager.latest().unwrap().unwrap();
    assert_eq!(second.history_type.code(), "~");

    let diff = modified_fields(&manager, &second).unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0].field_name, "name");
    assert_eq!(diff[0].from_value, Some(FieldValue::from("A")));
    assert_eq!(diff[0].to_value, FieldValue::from("B"));

    history
        .record_change(&conn, &b, Change::Saved(SaveEvent::updated().at(t(2))))
        .unwrap();
    assert_eq!(manager.count().unwrap(), 2);

    history.record_change(&conn, &b, Change::deleted()).unwrap();
    assert_eq!(manager.count().unwrap(), 3);
    assert_eq!(manager.latest().unwrap().unwrap().history_type.code(), "-");

    assert!(manager.as_of(Utc::now()).unwrap_err().is_already_deleted());

    let first_date = manager.all().unwrap().last().unwrap().history_date;
    assert_eq!(manager.as_of(first_date).unwrap(), a);
}
