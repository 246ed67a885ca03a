//! Store lifecycle: durability across power cycles and the config HTTP
//! surface end to end.

use homelink::error::StoreError;
use homelink::store::medium::MemoryMedium;
use homelink::store::value::{EntryType, Value};
use homelink::store::{ConfigStore, OpenMode};
use homelink::supervisor::routes;

#[test]
fn committed_value_survives_power_cycle() {
    let medium = MemoryMedium::new();
    {
        let store = ConfigStore::new(medium.clone()).unwrap();
        let mut h = store.open("mqtt", OpenMode::ReadWrite).unwrap();
        h.set("broker", Value::Str("mqtt://10.0.0.5".into())).unwrap();
        h.commit().unwrap();
        h.close();
    }

    // "Reboot": a fresh store over the same medium.
    let store = ConfigStore::new(medium).unwrap();
    let h = store.open("mqtt", OpenMode::ReadOnly).unwrap();
    let (ty, value) = h.get("broker").unwrap();
    assert_eq!(ty, EntryType::Str);
    assert_eq!(value.as_str(), Some("mqtt://10.0.0.5"));
}

#[test]
fn every_type_round_trips_through_a_power_cycle() {
    let medium = MemoryMedium::new();
    let values = [
        ("u8", Value::U8(7)),
        ("i8", Value::I8(-7)),
        ("u16", Value::U16(65_000)),
        ("i16", Value::I16(-32_000)),
        ("u32", Value::U32(4_000_000_000)),
        ("i32", Value::I32(-2_000_000_000)),
        ("u64", Value::U64(u64::MAX)),
        ("i64", Value::I64(i64::MIN)),
        ("s", Value::Str("héllo wörld".into())),
        ("b", Value::Blob(vec![0, 1, 2, 255])),
    ];

    {
        let store = ConfigStore::new(medium.clone()).unwrap();
        let mut h = store.open("types", OpenMode::ReadWrite).unwrap();
        for (key, value) in &values {
            h.set(key, value.clone()).unwrap();
        }
        h.commit().unwrap();
    }

    let store = ConfigStore::new(medium).unwrap();
    let h = store.open("types", OpenMode::ReadOnly).unwrap();
    for (key, expected) in &values {
        let (ty, value) = h.get(key).unwrap();
        assert_eq!(ty, expected.entry_type(), "tag for {key}");
        assert_eq!(&value, expected, "value for {key}");
    }
}

#[test]
fn erase_namespace_needs_no_commit() {
    let store = ConfigStore::new(MemoryMedium::new()).unwrap();
    let mut h = store.open("mqtt", OpenMode::ReadWrite).unwrap();
    h.set("broker", Value::Str("mqtt://10.0.0.5".into())).unwrap();
    h.commit().unwrap();

    h.erase_all().unwrap();
    assert_eq!(h.get("broker"), Err(StoreError::NotFound));

    // Also gone for a fresh handle, with no commit in between.
    let fresh = store.open("mqtt", OpenMode::ReadWrite).unwrap();
    assert_eq!(fresh.get("broker"), Err(StoreError::NotFound));
}

#[test]
fn http_surface_round_trip_across_reboot() {
    let medium = MemoryMedium::new();
    {
        let store = ConfigStore::new(medium.clone()).unwrap();
        routes::set_key(
            &store,
            "mqtt",
            "broker",
            br#"{"type":"string","value":"mqtt://10.0.0.5"}"#,
        )
        .unwrap();
    }

    let store = ConfigStore::new(medium).unwrap();
    let body = routes::get_key(&store, "mqtt", "broker").unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["type"], "string");
    assert_eq!(parsed["value"], "mqtt://10.0.0.5");
}

#[test]
fn iteration_reflects_deletes() {
    let store = ConfigStore::new(MemoryMedium::new()).unwrap();
    let mut h = store.open("a", OpenMode::ReadWrite).unwrap();
    h.set("one", Value::U8(1)).unwrap();
    h.set("two", Value::U8(2)).unwrap();
    h.commit().unwrap();

    assert_eq!(store.entries(Some("a")).count(), 2);
    h.erase_key("one").unwrap();
    assert_eq!(store.entries(Some("a")).count(), 1);

    let remaining: Vec<_> = store.entries(Some("a")).map(|e| e.key).collect();
    assert_eq!(remaining, vec!["two".to_string()]);
}

#[test]
fn mismatched_read_does_not_disturb_entry() {
    let store = ConfigStore::new(MemoryMedium::new()).unwrap();
    let mut h = store.open("sys", OpenMode::ReadWrite).unwrap();
    h.set("count", Value::U16(512)).unwrap();
    h.commit().unwrap();

    assert_eq!(h.get_as("count", EntryType::U32), Err(StoreError::TypeMismatch));
    // Entry is intact after the failed read.
    assert_eq!(h.get_as("count", EntryType::U16).unwrap(), Value::U16(512));
}
