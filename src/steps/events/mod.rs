//! The events step: one transaction per legacy event.
//!
//! For every event a fresh event namespace is registered with the state
//! manager, the event row is created, and each event-scoped migrator runs
//! once against an [`EventContext`]. The event is recorded in
//! `migrated_events` only after its transaction committed, so a resumed run
//! redoes exactly the event that was in flight.

use crate::core::decode::{self, LegacyConference};
use crate::core::error::{MigrateError, Result};
use crate::core::graph::LegacyObject;
use crate::core::migration::{Migrator, Outcome, StepContext, WholeGraph};
use crate::core::namespace::{NsHandle, NsValue, event, event_namespace, global};
use crate::core::refs::EntityRef;
use crate::core::schemas::TIMETABLE_TRIGGERS;
use crate::core::text::sanitize_user_input;
use crate::core::time::{parse_tz, to_db};
use crate::steps::each_object;
use chrono_tz::Tz;
use rusqlite::params;
use std::rc::Rc;

pub mod acl;
pub mod attachments;
pub mod event_type;
pub mod legacy_id;
pub mod logs;
pub mod misc;
pub mod notes;
pub mod sessions;
pub mod shorturl;
pub mod timetable;

pub const LOST_AND_FOUND_TITLE: &str = "Lost & Found";

/// One legacy event on its way into the destination.
pub struct EventContext {
    pub obj: Rc<LegacyObject>,
    pub legacy: LegacyConference,
    pub event_id: i64,
    pub tz: Tz,
    pub ns: NsHandle,
}

impl EventContext {
    pub fn legacy_id(&self) -> &str {
        &self.legacy.id
    }
}

pub type EventMigrator = Box<dyn Migrator<EventContext>>;

/// Event-scoped migrators in the order they run for each event.
pub fn event_migrators(ctx: &StepContext) -> Vec<EventMigrator> {
    vec![
        misc::build(ctx),
        event_type::build(ctx),
        acl::build(ctx),
        logs::build(ctx),
        shorturl::build(ctx),
        sessions::build(ctx),
        timetable::build(ctx),
        attachments::build(ctx),
        notes::build(ctx),
        legacy_id::build(ctx),
    ]
}

pub struct EventsStep {
    ctx: StepContext,
    migrators: Vec<EventMigrator>,
    migrated: usize,
    skipped: usize,
}

pub fn build(ctx: &StepContext) -> Result<Box<dyn Migrator<WholeGraph>>> {
    Ok(Box::new(EventsStep {
        ctx: ctx.clone(),
        migrators: event_migrators(ctx),
        migrated: 0,
        skipped: 0,
    }))
}

impl EventsStep {
    fn init_counter(&self) -> Result<()> {
        let mut ns = self.ctx.global.borrow_mut();
        if ns.slot(global::EVENT_ID_COUNTER)?.is_none() {
            let start = decode::counter(self.ctx.graph.as_ref(), "CONFERENCE")?
                .max(self.ctx.dest.max_id("events")?);
            ns.put_slot(global::EVENT_ID_COUNTER, Some(NsValue::Int(start)))?;
        }
        Ok(())
    }

    fn allocate_event_id(&self, legacy_id: &str) -> Result<i64> {
        let dest = &self.ctx.dest;
        if !decode::is_legacy_id(legacy_id) {
            if let Ok(id) = legacy_id.parse::<i64>() {
                if !dest.row_exists("events", id)? {
                    return Ok(id);
                }
            }
        }
        let mut ns = self.ctx.global.borrow_mut();
        let mut next = ns
            .slot(global::EVENT_ID_COUNTER)?
            .and_then(NsValue::as_int)
            .unwrap_or(0);
        loop {
            next += 1;
            if !dest.row_exists("events", next)? {
                break;
            }
        }
        ns.put_slot(global::EVENT_ID_COUNTER, Some(NsValue::Int(next)))?;
        Ok(next)
    }

    /// The category orphaned events go to, created on first use.
    fn lost_and_found(&self) -> Result<i64> {
        let dest = &self.ctx.dest;
        let existing = self
            .ctx
            .global
            .borrow()
            .slot(global::LOSTANDFOUND_CATEGORY)?
            .and_then(NsValue::as_entity);
        if let Some(cat) = existing {
            if dest.row_exists("categories", cat.id)? {
                return Ok(cat.id);
            }
        }
        let root = self
            .ctx
            .global
            .borrow()
            .lookup_entity(global::LEGACY_CATEGORY_IDS, &NsValue::from("0"))?
            .ok_or_else(|| {
                MigrateError::OrderingViolation("lost and found needs the root category".into())
            })?;
        let position = dest.count(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM categories WHERE parent_id = ?1",
            [root.id],
        )?;
        let id = dest.insert(
            "INSERT INTO categories (parent_id, position, title, description, timezone, protection_mode)
             VALUES (?1, ?2, ?3, 'Events that had no category in the old database', 'UTC', 'protected')",
            params![root.id, position, LOST_AND_FOUND_TITLE],
        )?;
        self.ctx
            .global
            .borrow_mut()
            .put_slot(global::LOSTANDFOUND_CATEGORY, Some(EntityRef::category(id).into()))?;
        self.ctx
            .log
            .warning(&format!("Created {} category {}", LOST_AND_FOUND_TITLE, id));
        Ok(id)
    }

    /// Insert the event row. `None` when the event cannot be placed.
    fn create_event(&self, legacy: &LegacyConference) -> Result<Option<(i64, Tz)>> {
        let log = &self.ctx.log;
        let category = match &legacy.owner_category_id {
            Some(owner) => self
                .ctx
                .global
                .borrow()
                .lookup_entity(global::LEGACY_CATEGORY_IDS, &NsValue::from(owner.as_str()))?,
            None => None,
        };
        let category = match category {
            Some(cat) => cat.id,
            None => {
                log.event_error(&legacy.id, "Event has no category!");
                if !self.ctx.config.migrate_broken_events {
                    return Ok(None);
                }
                self.lost_and_found()?
            }
        };
        let Some(start) = legacy.start else {
            log.event_error(&legacy.id, "Event has no start date");
            return Ok(None);
        };
        let end = legacy.end.unwrap_or(start);
        if start.is_naive() || end.is_naive() {
            log.event_warning(&legacy.id, "Naive datetime converted using the event timezone");
        }
        let (tz_name, tz) = match legacy
            .timezone
            .as_deref()
            .and_then(|name| parse_tz(name).map(|tz| (name.trim().to_string(), tz)))
        {
            Some(found) => found,
            None => ("UTC".to_string(), chrono_tz::UTC),
        };
        let title = sanitize_user_input(&legacy.title);
        let title = if title.is_empty() {
            "(no title)".to_string()
        } else {
            title
        };
        let id = self.allocate_event_id(&legacy.id)?;
        self.ctx.dest.execute(
            "INSERT INTO events (id, category_id, title, description, timezone, start_dt, end_dt, is_locked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                category,
                title,
                legacy.description.trim(),
                tz_name,
                to_db(start.to_utc(tz)),
                to_db(end.to_utc(tz)),
                legacy.closed
            ],
        )?;
        Ok(Some((id, tz)))
    }

    /// Create the event and run every event migrator on it. `false` when the
    /// event was skipped.
    fn migrate_contents(
        &mut self,
        obj: Rc<LegacyObject>,
        legacy: LegacyConference,
        ns: NsHandle,
    ) -> Result<bool> {
        let Some((event_id, tz)) = self.create_event(&legacy)? else {
            return Ok(false);
        };
        let mut ectx = EventContext {
            obj,
            legacy,
            event_id,
            tz,
            ns,
        };
        let log = Rc::clone(&self.ctx.log);
        for migrator in self.migrators.iter_mut() {
            let outcome = migrator.run(&mut ectx).map_err(|e| {
                MigrateError::step_failed(&format!("{} (event {})", migrator.name(), ectx.legacy.id), e)
            })?;
            if let Outcome::Skipped(reason) = outcome {
                log.log(&format!("[{}] {}: {}", ectx.legacy.id, migrator.name(), reason));
            }
        }
        Ok(true)
    }

    fn migrate_event(&mut self, obj: Rc<LegacyObject>) -> Result<()> {
        let ctx = self.ctx.clone();
        let legacy = match decode::conference(ctx.graph.as_ref(), &obj) {
            Ok(legacy) => legacy,
            Err(MigrateError::LegacyData(msg)) => {
                ctx.log.warning(&format!("Skipping event entry: {}", msg));
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let marker = NsValue::Legacy(obj.legacy_ref());
        if ctx.global.borrow().set(global::MIGRATED_EVENTS)?.contains(&marker) {
            ctx.log.event_info(&legacy.id, "Already migrated");
            return Ok(());
        }

        let checkpoint = ctx.global.borrow().checkpoint();
        ctx.dest.begin()?;
        let ns = event_namespace().into_handle();
        ctx.state.borrow_mut().register_namespace(&ns);
        let legacy_id = legacy.id.clone();
        match self.migrate_contents(obj, legacy, ns) {
            Ok(done) => {
                ctx.dest.commit()?;
                ctx.global
                    .borrow_mut()
                    .set_mut(global::MIGRATED_EVENTS)?
                    .insert(marker);
                ctx.state.borrow_mut().unregister_namespace(event::NAME);
                if done {
                    self.migrated += 1;
                    ctx.log.log(&format!("Event {} migrated", legacy_id));
                } else {
                    self.skipped += 1;
                }
                Ok(())
            }
            Err(e) => {
                // The event namespace stays registered so a restore point
                // shows what the failed event had built.
                if let Err(rb) = ctx.dest.rollback() {
                    ctx.log.error(&format!("Rollback failed: {}", rb));
                }
                // Id counter and lost & found must match the rolled back rows.
                ctx.global.borrow_mut().restore(checkpoint);
                Err(e)
            }
        }
    }
}

impl Migrator<WholeGraph> for EventsStep {
    fn name(&self) -> &'static str {
        "events"
    }

    fn prepare(&mut self) -> Result<()> {
        for migrator in self.migrators.iter_mut() {
            migrator.prepare()?;
        }
        Ok(())
    }

    fn run(&mut self, _unit: &mut WholeGraph) -> Result<Outcome> {
        let dest = Rc::clone(&self.ctx.dest);
        let _triggers = dest.disable_triggers(TIMETABLE_TRIGGERS)?;
        self.init_counter()?;
        let ctx = self.ctx.clone();
        let graph = ctx.graph.as_ref();
        each_object(&ctx, graph, "Events", graph.collection("conferences")?, |obj| {
            self.migrate_event(obj)
        })?;
        ctx.log.success(&format!(
            "{} events migrated, {} skipped",
            self.migrated, self.skipped
        ));
        Ok(Outcome::Done)
    }

    fn finish(&mut self) -> Result<()> {
        let mut first_error = None;
        for migrator in self.migrators.iter_mut() {
            if let Err(e) = migrator.finish() {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        self.ctx.dest.fix_sequences(&["events"])
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{conference, site};
    use super::*;
    use crate::core::logger::Level;
    use crate::steps::testing::{harness, harness_with};
    use serde_json::json;

    fn run_up_to_events(h: &crate::steps::testing::Harness) -> Result<Outcome> {
        h.run("users")?;
        h.run("categories")?;
        h.run("events")
    }

    #[test]
    fn numeric_and_legacy_ids() {
        let h = harness(site(
            &["0x100", "0x101"],
            json!({
                "0x100": conference("42", Some("0x11"), json!({})),
                "0x101": conference("a12", Some("0x11"), json!({"title": ""}))
            }),
        ));
        run_up_to_events(&h).unwrap();

        assert_eq!(h.count("SELECT COUNT(*) FROM events WHERE id = 42 AND category_id = 1"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM events WHERE id = 1001 AND title = '(no title)'"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM legacy_event_mappings WHERE legacy_event_id = 'a12' AND event_id = 1001"), 1);
        let ns = h.ctx.global.borrow();
        assert_eq!(ns.set(global::MIGRATED_EVENTS).unwrap().len(), 2);
        assert_eq!(ns.slot(global::EVENT_ID_COUNTER).unwrap(), Some(&NsValue::Int(1001)));
        drop(ns);
        assert!(!h.ctx.state.borrow().snapshot().namespaces.contains_key(event::NAME));
        assert!(h.ctx.dest.trigger_enabled("consistent_timetable").unwrap());
    }

    #[test]
    fn orphans_are_skipped_by_default() {
        let h = harness(site(&["0x100"], json!({"0x100": conference("7", None, json!({}))})));
        run_up_to_events(&h).unwrap();
        assert_eq!(h.count("SELECT COUNT(*) FROM events"), 0);
        assert!(h.log.contains(Level::Error, "Event has no category!"));
    }

    #[test]
    fn orphans_can_go_to_lost_and_found() {
        let h = harness_with(
            site(
                &["0x100", "0x101"],
                json!({
                    "0x100": conference("7", None, json!({})),
                    "0x101": conference("8", Some("0x99"), json!({}))
                }),
            ),
            |c| c.migrate_broken_events = true,
        );
        run_up_to_events(&h).unwrap();
        assert_eq!(
            h.count("SELECT COUNT(*) FROM categories WHERE title = 'Lost & Found' AND parent_id = 0 AND protection_mode = 'protected'"),
            1
        );
        assert_eq!(
            h.count("SELECT COUNT(*) FROM events e JOIN categories c ON c.id = e.category_id WHERE c.title = 'Lost & Found'"),
            2
        );
    }

    #[test]
    fn migrated_events_are_not_redone() {
        let h = harness(site(&["0x100"], json!({"0x100": conference("42", Some("0x11"), json!({}))})));
        run_up_to_events(&h).unwrap();
        h.run("events").unwrap();
        assert_eq!(h.count("SELECT COUNT(*) FROM events"), 1);
        assert!(h.log.contains(Level::Info, "Already migrated"));
    }
}
