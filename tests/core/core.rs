use conf_migrate::core::codec::LiveResolver;
use conf_migrate::core::db::Destination;
use conf_migrate::core::error::MigrateError;
use conf_migrate::core::graph::{JsonGraph, LegacyGraph, Oid};
use conf_migrate::core::logger::{Level, RecordingLogger};
use conf_migrate::core::namespace::{NsValue, event, event_namespace, global, global_namespace};
use conf_migrate::core::principal::PrincipalResolver;
use conf_migrate::core::refs::{EntityKind, EntityRef, LegacyKind, LegacyRef};
use conf_migrate::core::schemas;
use conf_migrate::core::state::{MigrationStateManager, RestorePoint};
use rusqlite::params;
use serde_json::json;
use std::rc::Rc;
use tempfile::tempdir;

fn scratch_dest(dir: &std::path::Path) -> Destination {
    let dest = Destination::open(&format!("sqlite://{}", dir.join("dest.db").display())).expect("open");
    dest.prepare_schema().expect("schema");
    dest
}

fn graph() -> JsonGraph {
    JsonGraph::from_value(json!({
        "root": {},
        "objects": {
            "0x100": {"class": "MaKaC.conference.Conference", "state": {"id": "42"}},
            "0x130": {"class": "MaKaC.conference.Session", "state": {"id": "s1"}}
        }
    }))
    .expect("graph")
}

#[test]
fn restore_point_survives_a_restart_against_live_data() {
    let tmp = tempdir().expect("tempdir");
    let dest = scratch_dest(tmp.path());
    dest.execute(
        "INSERT INTO users (id, first_name, last_name, email) VALUES (1, 'Ada', 'Lovelace', 'ada@example.org')",
        [],
    )
    .unwrap();
    let graph = graph();
    let conference = graph.load(Oid(0x100)).unwrap().legacy_ref();

    let mut before = MigrationStateManager::new();
    let ns = global_namespace().into_handle();
    before.register_namespace(&ns);
    let events = event_namespace().into_handle();
    before.register_namespace(&events);
    {
        let mut g = ns.borrow_mut();
        g.insert(global::AVATAR_MERGED_USER, "1", EntityRef::user(1)).unwrap();
        g.insert(global::AVATAR_MERGED_USER, "2", EntityRef::user(2)).unwrap();
        g.set_mut(global::MIGRATED_EVENTS).unwrap().insert(NsValue::from(conference));
        g.set_mut(global::MIGRATED_EVENTS).unwrap().insert(NsValue::from(LegacyRef {
            oid: Oid(0x999),
            kind: LegacyKind::Event,
        }));
        g.put_slot(global::EVENT_ID_COUNTER, Some(NsValue::from(1005i64))).unwrap();
        g.setmap_entry(global::USER_FAVORITE_CATEGORIES, NsValue::from(EntityRef::user(1)))
            .unwrap()
            .insert(NsValue::from("7"));
        g.insert(
            global::ROOM_MAPPING,
            NsValue::pair("Main", "1-001"),
            NsValue::pair(EntityRef::new(EntityKind::Location, 1), 3i64),
        )
        .unwrap();
    }
    events
        .borrow_mut()
        .insert(event::LEGACY_SESSION_MAP, graph.load(Oid(0x130)).unwrap().legacy_ref(), 9i64)
        .unwrap();
    before.register_step("global_pre_events");
    before.register_step("users");

    let path = tmp.path().join("restore.json");
    before.save_restore_point(&path).unwrap();
    let point = RestorePoint::read(&path).unwrap();
    assert_eq!(point.steps, vec!["global_pre_events", "users"]);
    assert!(point.namespaces.contains_key(event::NAME));

    // A restarted run only has the global namespace registered.
    let mut after = MigrationStateManager::new();
    let restored = global_namespace().into_handle();
    after.register_namespace(&restored);
    let resolver = LiveResolver {
        dest: &dest,
        graph: &graph,
    };
    let dropped = after.load_restore_point(&point, &resolver).unwrap();

    // user 2 was never written and 0x999 is not in the graph; the room
    // tuple points at a location that does not exist either.
    assert_eq!(dropped, 3);
    assert!(after.has_already_run("users"));
    assert!(!after.has_already_run("categories"));
    let g = restored.borrow();
    assert_eq!(
        g.lookup_entity(global::AVATAR_MERGED_USER, &NsValue::from("1")).unwrap(),
        Some(EntityRef::user(1))
    );
    assert!(g.lookup(global::AVATAR_MERGED_USER, &NsValue::from("2")).unwrap().is_none());
    assert_eq!(g.set(global::MIGRATED_EVENTS).unwrap().len(), 1);
    assert_eq!(
        g.slot(global::EVENT_ID_COUNTER).unwrap().and_then(NsValue::as_int),
        Some(1005)
    );
    assert_eq!(g.setmap(global::USER_FAVORITE_CATEGORIES).unwrap().len(), 1);
}

#[test]
fn sequences_are_repaired_after_explicit_ids() {
    let tmp = tempdir().expect("tempdir");
    let dest = scratch_dest(tmp.path());
    dest.with_transaction(|d| {
        d.execute("INSERT INTO users (id, email) VALUES (50, 'a@example.org')", [])?;
        d.execute("INSERT INTO groups (id, name) VALUES (9, 'ops')", [])?;
        Ok(())
    })
    .unwrap();
    dest.fix_sequences(&["users", "groups"]).unwrap();
    for (table, max) in [("users", 50), ("groups", 9)] {
        assert!(dest.next_id(table).unwrap() > max);
    }
    let id = dest
        .insert("INSERT INTO users (email) VALUES (?1)", params!["b@example.org"])
        .unwrap();
    assert_eq!(id, 51);
}

#[test]
fn timetable_triggers_come_back_after_a_failure() {
    let tmp = tempdir().expect("tempdir");
    let dest = scratch_dest(tmp.path());
    let name = schemas::TIMETABLE_TRIGGERS[0];
    let result: Result<(), MigrateError> = (|| {
        let _guard = dest.disable_triggers(schemas::TIMETABLE_TRIGGERS)?;
        assert!(!dest.trigger_enabled(name)?);
        Err(MigrateError::LegacyData("broken event".into()))
    })();
    assert!(result.is_err());
    assert!(dest.trigger_enabled(name).unwrap());
}

#[test]
fn destination_with_rows_reports_the_table() {
    let tmp = tempdir().expect("tempdir");
    let dest = scratch_dest(tmp.path());
    assert_eq!(dest.has_data().unwrap(), None);
    dest.execute("INSERT INTO categories (id, title) VALUES (0, 'Home')", []).unwrap();
    assert_eq!(dest.has_data().unwrap().as_deref(), Some("categories"));
}

#[test]
fn principals_resolve_through_the_shared_namespace() {
    let ns = global_namespace().into_handle();
    let log = Rc::new(RecordingLogger::new());
    let resolver = PrincipalResolver::new(ns.clone(), "ldap", log.clone());

    assert!(resolver.email("  ADA@Example.org ", "event 42").unwrap().is_some());
    assert!(resolver.email("not-an-email", "event 42").unwrap().is_none());
    assert!(log.contains(Level::Warning, "Invalid email 'not-an-email' in event 42"));
    assert_eq!(resolver.system_user().unwrap(), None);

    ns.borrow_mut()
        .put_slot(global::SYSTEM_USER, Some(NsValue::from(EntityRef::user(0))))
        .unwrap();
    assert_eq!(resolver.system_user().unwrap(), Some(0));
}
