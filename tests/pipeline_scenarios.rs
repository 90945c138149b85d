//! End-to-end runs of the whole pipeline over small legacy dumps.

mod support;

use conf_migrate::core::broker::StepBroker;
use conf_migrate::core::db::Destination;
use conf_migrate::core::error::{MigrateError, Result};
use conf_migrate::core::files::ArchiveResolver;
use conf_migrate::core::graph::{Attr, JsonGraph, LegacyGraph, LegacyObject, Oid};
use conf_migrate::core::logger::{Level, RecordingLogger};
use conf_migrate::core::migration::StepContext;
use conf_migrate::core::pipeline::Pipeline;
use conf_migrate::core::tui::StepStatus;
use conf_migrate::steps::all_steps;
use conf_migrate::{build_pipeline, migrate};
use serde_json::{Value as JsonValue, json};
use std::cell::Cell;
use std::rc::Rc;
use support::{Scratch, avatar, conference, site};

fn count(pipeline: &Pipeline, sql: &str) -> i64 {
    pipeline.context().dest.count(sql, []).expect("count query")
}

fn statuses(pipeline: &Pipeline) -> Vec<StepStatus> {
    pipeline.summary().iter().map(|(_, s)| *s).collect()
}

#[test]
fn clean_run() {
    let scratch = Scratch::new();
    let dump = site(
        &["0x100"],
        json!({
            "0x100": conference("42", true, json!({
                "sessions": [{"$ref": "0x130"}, {"$ref": "0x131"}],
                "ac": {"$ref": "0x190"}
            })),
            "0x130": {"class": "MaKaC.conference.Session", "state": {"id": "s1", "title": "Morning"}},
            "0x131": {"class": "MaKaC.conference.Session", "state": {"id": "s2", "title": "Afternoon"}},
            "0x190": {"class": "MaKaC.accessControl.AccessController", "state": {
                "managers": [{"$ref": "0x3"}, {"$ref": "0x20"}]
            }}
        }),
    );
    let config = scratch.config(&dump);
    let log = Rc::new(RecordingLogger::new());
    migrate(config, log.clone()).unwrap();

    let dest = Destination::open(&scratch.db_uri()).unwrap();
    let count = |sql: &str| dest.count(sql, []).unwrap();
    assert_eq!(count("SELECT COUNT(*) FROM users WHERE is_system = 0"), 3);
    assert_eq!(count("SELECT COUNT(*) FROM groups"), 2);
    assert_eq!(count("SELECT COUNT(*) FROM group_members WHERE group_id = 7"), 2);
    assert_eq!(count("SELECT COUNT(*) FROM categories"), 1);
    assert_eq!(count("SELECT COUNT(*) FROM events WHERE id = 42 AND category_id = 0"), 1);
    assert_eq!(count("SELECT COUNT(*) FROM sessions WHERE event_id = 42"), 2);
    assert_eq!(
        count("SELECT COUNT(*) FROM sessions WHERE title = 'Afternoon' AND friendly_id = 2"),
        1
    );
    assert_eq!(
        count("SELECT COUNT(*) FROM event_principals WHERE event_id = 42 AND user_id = 2 AND full_access = 1"),
        1
    );
    assert_eq!(
        count("SELECT COUNT(*) FROM event_principals WHERE event_id = 42 AND local_group_id = 7 AND full_access = 1"),
        1
    );

    let written = std::fs::read_to_string(scratch.path("migration.log")).unwrap();
    assert!(written.contains("Migration finished"));
    let journal = StepBroker::beside(&scratch.path("migration.log")).read().unwrap();
    let completed = journal.iter().filter(|e| e.status == "completed").count();
    assert_eq!(completed, all_steps().len());
    assert!(log.messages(Level::Error).is_empty());
}

/// Fails loading one object while armed; otherwise a plain JSON graph.
struct FlakyGraph {
    inner: JsonGraph,
    poison: Oid,
    armed: Cell<bool>,
}

impl LegacyGraph for FlakyGraph {
    fn root_entry(&self, name: &str) -> Option<Attr> {
        self.inner.root_entry(name)
    }

    fn load(&self, oid: Oid) -> Result<Rc<LegacyObject>> {
        if self.armed.get() && oid == self.poison {
            return Err(std::io::Error::other("connection to the legacy store lost").into());
        }
        self.inner.load(oid)
    }

    fn contains(&self, oid: Oid) -> bool {
        self.inner.contains(oid)
    }

    fn sync(&self) {
        self.inner.sync()
    }
}

/// Four events: 42 is fine, 43 and 45 have no category, 44 has a timetable
/// entry the flaky graph fails on.
fn crash_dump() -> JsonValue {
    site(
        &["0x100", "0x101", "0x102", "0x103"],
        json!({
            "0x100": conference("42", true, json!({})),
            "0x101": conference("43", false, json!({})),
            "0x102": conference("44", true, json!({"_schedule": [{"$ref": "0x160"}]})),
            "0x103": conference("45", false, json!({})),
            "0x160": {"class": "MaKaC.schedule.BreakTimeSchEntry", "state": {
                "title": "Coffee", "startDate": "2015-03-01T10:00:00+00:00", "duration": 30
            }}
        }),
    )
}

#[test]
fn crash_inside_events_then_resume() {
    let scratch = Scratch::new();
    let dump = crash_dump();
    let restore = scratch.path("restore.json");

    let mut config = scratch.config(&dump);
    config.save_restore = Some(restore.clone());
    config.migrate_broken_events = true;
    let dest = Destination::open(&config.destination_uri).unwrap();
    dest.prepare_schema().unwrap();
    let graph = FlakyGraph {
        inner: JsonGraph::from_value(dump.clone()).unwrap(),
        poison: Oid(0x160),
        armed: Cell::new(true),
    };
    let log = Rc::new(RecordingLogger::new());
    let files = ArchiveResolver::new(config.archive_dirs.clone(), "fs");
    let broker = StepBroker::beside(&config.log_file);
    let ctx = StepContext::new(
        Rc::new(config.clone()),
        Rc::new(graph),
        None,
        Rc::new(dest),
        log.clone(),
        Rc::new(files),
    );
    let mut first = Pipeline::new(ctx, all_steps(), broker);
    let err = first.run().unwrap_err();
    match &err {
        MigrateError::StepFailed { step, .. } => assert_eq!(step, "events"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(err.root(), MigrateError::IoError(_)));
    assert_eq!(
        statuses(&first)[..5],
        [
            StepStatus::Completed,
            StepStatus::Completed,
            StepStatus::Skipped,
            StepStatus::Completed,
            StepStatus::Failed
        ]
    );
    assert_eq!(count(&first, "SELECT COUNT(*) FROM events"), 2);
    assert!(restore.exists());
    assert!(log.contains(Level::Warning, "Restore point saved"));
    drop(first);

    let mut config = scratch.config(&dump);
    config.restore_file = Some(restore);
    config.migrate_broken_events = true;
    config.validate().unwrap();
    let log = Rc::new(RecordingLogger::new());
    let mut second = build_pipeline(config, log.clone()).unwrap();
    second.run().unwrap();

    assert_eq!(statuses(&second)[..4], [StepStatus::Skipped; 4]);
    assert_eq!(statuses(&second)[4], StepStatus::Completed);
    assert_eq!(count(&second, "SELECT COUNT(*) FROM events"), 4);
    assert_eq!(count(&second, "SELECT COUNT(*) FROM events WHERE id = 42"), 1);
    assert_eq!(count(&second, "SELECT COUNT(*) FROM users WHERE is_system = 0"), 3);
    assert_eq!(
        count(&second, "SELECT COUNT(*) FROM timetable_entries WHERE event_id = 44 AND title = 'Coffee'"),
        1
    );
    assert_eq!(count(&second, "SELECT COUNT(*) FROM categories WHERE title = 'Lost & Found'"), 1);
    assert_eq!(
        count(
            &second,
            "SELECT COUNT(*) FROM events e JOIN categories c ON c.id = e.category_id
             WHERE c.title = 'Lost & Found'"
        ),
        2
    );
    assert!(log.contains(Level::Info, "Already migrated"));
    assert!(log.contains(Level::Info, "Skipping previously-run step users"));
}

fn mapped_event_id(pipeline: &Pipeline, legacy_id: &str) -> Option<i64> {
    pipeline
        .context()
        .dest
        .conn()
        .query_row(
            "SELECT event_id FROM legacy_event_mappings WHERE legacy_event_id = ?1",
            [legacy_id],
            |r| r.get(0),
        )
        .ok()
}

/// Like `crash_dump`, but the failing event has a non-numeric id and needs
/// one allocated from the counter.
fn counter_dump() -> JsonValue {
    site(
        &["0x100", "0x102", "0x104"],
        json!({
            "0x100": conference("42", true, json!({})),
            "0x102": conference("a44", true, json!({"_schedule": [{"$ref": "0x160"}]})),
            "0x104": conference("b46", true, json!({})),
            "0x160": {"class": "MaKaC.schedule.BreakTimeSchEntry", "state": {
                "title": "Coffee", "startDate": "2015-03-01T10:00:00+00:00", "duration": 30
            }}
        }),
    )
}

#[test]
fn resumed_run_allocates_the_same_event_ids() {
    let dump = counter_dump();

    let clean_scratch = Scratch::new();
    let mut clean = build_pipeline(clean_scratch.config(&dump), Rc::new(RecordingLogger::new())).unwrap();
    clean.run().unwrap();
    let expected = (mapped_event_id(&clean, "a44"), mapped_event_id(&clean, "b46"));
    assert_eq!(expected, (Some(1001), Some(1002)));

    let scratch = Scratch::new();
    let restore = scratch.path("restore.json");
    let mut config = scratch.config(&dump);
    config.save_restore = Some(restore.clone());
    let dest = Destination::open(&config.destination_uri).unwrap();
    dest.prepare_schema().unwrap();
    let graph = FlakyGraph {
        inner: JsonGraph::from_value(dump.clone()).unwrap(),
        poison: Oid(0x160),
        armed: Cell::new(true),
    };
    let files = ArchiveResolver::new(config.archive_dirs.clone(), "fs");
    let broker = StepBroker::beside(&config.log_file);
    let ctx = StepContext::new(
        Rc::new(config.clone()),
        Rc::new(graph),
        None,
        Rc::new(dest),
        Rc::new(RecordingLogger::new()),
        Rc::new(files),
    );
    let mut first = Pipeline::new(ctx, all_steps(), broker);
    assert!(first.run().is_err());
    assert_eq!(mapped_event_id(&first, "a44"), None);
    drop(first);

    let mut config = scratch.config(&dump);
    config.restore_file = Some(restore);
    config.validate().unwrap();
    let mut second = build_pipeline(config, Rc::new(RecordingLogger::new())).unwrap();
    second.run().unwrap();
    assert_eq!(
        (mapped_event_id(&second, "a44"), mapped_event_id(&second, "b46")),
        expected
    );
}

#[test]
fn orphaned_events_are_skipped_by_default() {
    let scratch = Scratch::new();
    let dump = site(
        &["0x100", "0x101"],
        json!({
            "0x100": conference("42", true, json!({})),
            "0x101": conference("43", false, json!({}))
        }),
    );
    let log = Rc::new(RecordingLogger::new());
    let mut pipeline = build_pipeline(scratch.config(&dump), log.clone()).unwrap();
    pipeline.run().unwrap();

    assert_eq!(count(&pipeline, "SELECT COUNT(*) FROM events"), 1);
    assert_eq!(count(&pipeline, "SELECT COUNT(*) FROM events WHERE id = 43"), 0);
    assert_eq!(count(&pipeline, "SELECT COUNT(*) FROM categories"), 1);
    assert!(log.contains(Level::Error, "Event has no category!"));
}

#[test]
fn orphaned_events_share_one_lost_and_found() {
    let scratch = Scratch::new();
    let dump = site(
        &["0x101", "0x102"],
        json!({
            "0x101": conference("43", false, json!({})),
            "0x102": conference("44", false, json!({}))
        }),
    );
    let mut config = scratch.config(&dump);
    config.migrate_broken_events = true;
    let log = Rc::new(RecordingLogger::new());
    let mut pipeline = build_pipeline(config, log.clone()).unwrap();
    pipeline.run().unwrap();

    assert_eq!(
        count(
            &pipeline,
            "SELECT COUNT(*) FROM categories WHERE title = 'Lost & Found' AND parent_id = 0
             AND protection_mode = 'protected'"
        ),
        1
    );
    assert_eq!(count(&pipeline, "SELECT COUNT(*) FROM events"), 2);
    assert_eq!(log.messages(Level::Warning).iter().filter(|m| m.contains("Created Lost & Found")).count(), 1);
}

#[test]
fn unresolvable_acl_principal_is_omitted() {
    let scratch = Scratch::new();
    let dump = site(
        &["0x100"],
        json!({
            "0x100": conference("42", true, json!({"ac": {"$ref": "0x190"}})),
            "0x190": {"class": "MaKaC.accessControl.AccessController", "state": {
                "_accessProtection": 1,
                "allowed": [{"$ref": "0x4"}, {"$ref": "0x99"}]
            }},
            "0x99": avatar("404", "Nobody", "Home", "gone@example.org")
        }),
    );
    let log = Rc::new(RecordingLogger::new());
    let mut pipeline = build_pipeline(scratch.config(&dump), log.clone()).unwrap();
    pipeline.run().unwrap();

    assert!(log.contains(Level::Warning, "User 404 doesn't exist"));
    assert_eq!(
        count(&pipeline, "SELECT COUNT(*) FROM event_principals WHERE event_id = 42 AND read_access = 1"),
        1
    );
    assert_eq!(
        count(&pipeline, "SELECT COUNT(*) FROM event_principals WHERE event_id = 42 AND user_id = 3 AND read_access = 1"),
        1
    );
    assert_eq!(
        count(&pipeline, "SELECT COUNT(*) FROM events WHERE id = 42 AND protection_mode = 'protected'"),
        1
    );
}
