//! Timetable entries: breaks, scheduled contributions and session blocks.
//!
//! Blocks grow to contain their children; legacy timetables did not
//! enforce it.

use super::sessions::{contribution_key, migrate_session, session_key};
use super::{EventContext, EventMigrator};
use crate::core::decode::{self, LegacyScheduleEntry};
use crate::core::error::{MigrateError, Result};
use crate::core::graph::Oid;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::namespace::event;
use crate::core::text::sanitize_user_input;
use crate::core::time::{LegacyDateTime, to_db};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

pub struct Timetable {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(Timetable { ctx: ctx.clone() })
}

#[derive(Clone, Copy)]
struct Block {
    entry_id: i64,
    session_id: i64,
}

type Span = (DateTime<Utc>, DateTime<Utc>);

fn span(start: DateTime<Utc>, minutes: i64) -> Span {
    (start, start + Duration::minutes(minutes))
}

impl Timetable {
    #[allow(clippy::too_many_arguments)]
    fn insert_entry(
        &self,
        ectx: &EventContext,
        parent: Option<Block>,
        kind: &str,
        session: Option<i64>,
        contribution: Option<i64>,
        title: &str,
        start: DateTime<Utc>,
        minutes: i64,
    ) -> Result<i64> {
        self.ctx.dest.insert(
            "INSERT INTO timetable_entries (event_id, parent_id, type, session_id, contribution_id, title,
             start_dt, duration_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ectx.event_id,
                parent.map(|b| b.entry_id),
                kind,
                session,
                contribution,
                title,
                to_db(start),
                minutes
            ],
        )
    }

    /// Session for a block, migrating sessions only the timetable knows of.
    fn block_session(&self, ectx: &EventContext, oid: Oid) -> Result<Option<i64>> {
        let known = ectx
            .ns
            .borrow()
            .lookup_entity(event::LEGACY_SESSION_MAP, &session_key(oid))?;
        if let Some(session) = known {
            return Ok(Some(session.id));
        }
        let obj = match self.ctx.graph.load(oid) {
            Ok(obj) => obj,
            Err(MigrateError::MissingObject(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let session = decode::session(&obj);
        self.ctx
            .log
            .event_warning(ectx.legacy_id(), &format!("Found zombie session {}", session.id));
        migrate_session(&self.ctx, ectx, &session, None).map(Some)
    }

    fn start_of(&self, ectx: &EventContext, oid: Oid, start: Option<LegacyDateTime>) -> Option<DateTime<Utc>> {
        match start {
            Some(dt) => Some(dt.to_utc(ectx.tz)),
            None => {
                self.ctx.log.event_warning(
                    ectx.legacy_id(),
                    &format!("Skipping timetable entry {} without start date", oid),
                );
                None
            }
        }
    }

    fn migrate_entries(&self, ectx: &EventContext, oids: &[Oid], parent: Option<Block>) -> Result<Vec<Span>> {
        let graph = self.ctx.graph.as_ref();
        let log = &self.ctx.log;
        let mut spans = Vec::with_capacity(oids.len());
        for oid in oids {
            let obj = match graph.load(*oid) {
                Ok(obj) => obj,
                Err(MigrateError::MissingObject(_)) => continue,
                Err(e) => return Err(e),
            };
            match decode::schedule_entry(graph, &obj)? {
                LegacyScheduleEntry::Break {
                    title,
                    start,
                    duration_minutes,
                } => {
                    let Some(start) = self.start_of(ectx, *oid, start) else {
                        continue;
                    };
                    let title = sanitize_user_input(&title);
                    self.insert_entry(ectx, parent, "break", None, None, &title, start, duration_minutes)?;
                    spans.push(span(start, duration_minutes));
                }
                LegacyScheduleEntry::Contribution {
                    contribution,
                    start,
                    duration_minutes,
                } => {
                    let known = ectx
                        .ns
                        .borrow()
                        .lookup_entity(event::LEGACY_CONTRIBUTION_MAP, &contribution_key(contribution))?;
                    let Some(contrib) = known else {
                        log.event_warning(
                            ectx.legacy_id(),
                            &format!("Skipping timetable entry for unknown contribution {}", contribution),
                        );
                        continue;
                    };
                    let Some(start) = self.start_of(ectx, *oid, start) else {
                        continue;
                    };
                    if let Some(block) = parent {
                        self.ctx.dest.execute(
                            "UPDATE contributions SET session_id = ?1 WHERE id = ?2",
                            params![block.session_id, contrib.id],
                        )?;
                    }
                    self.insert_entry(
                        ectx,
                        parent,
                        "contribution",
                        parent.map(|b| b.session_id),
                        Some(contrib.id),
                        "",
                        start,
                        duration_minutes,
                    )?;
                    spans.push(span(start, duration_minutes));
                }
                LegacyScheduleEntry::Block {
                    session,
                    title,
                    start,
                    duration_minutes,
                    children,
                } => {
                    if parent.is_some() {
                        log.event_error(ectx.legacy_id(), "Found a block nested in another block");
                        continue;
                    }
                    let session_id = match session {
                        Some(oid) => self.block_session(ectx, oid)?,
                        None => None,
                    };
                    let Some(session_id) = session_id else {
                        log.event_error(ectx.legacy_id(), &format!("Found block {} without session", oid));
                        continue;
                    };
                    let Some(start) = self.start_of(ectx, *oid, start) else {
                        continue;
                    };
                    let title = sanitize_user_input(&title);
                    let entry_id = self.insert_entry(
                        ectx,
                        None,
                        "block",
                        Some(session_id),
                        None,
                        &title,
                        start,
                        duration_minutes,
                    )?;
                    let block = Block { entry_id, session_id };
                    let own = span(start, duration_minutes);
                    let (mut lo, mut hi) = own;
                    for (child_start, child_end) in self.migrate_entries(ectx, &children, Some(block))? {
                        if child_start < lo {
                            log.event_warning(
                                ectx.legacy_id(),
                                &format!("Block boundary (start violated; extending block from {} to {})", lo, child_start),
                            );
                            lo = child_start;
                        }
                        if child_end > hi {
                            log.event_warning(
                                ectx.legacy_id(),
                                &format!("Block boundary (end violated; extending block from {} to {})", hi, child_end),
                            );
                            hi = child_end;
                        }
                    }
                    if (lo, hi) != own {
                        self.ctx.dest.execute(
                            "UPDATE timetable_entries SET start_dt = ?1, duration_minutes = ?2 WHERE id = ?3",
                            params![to_db(lo), (hi - lo).num_minutes(), entry_id],
                        )?;
                    }
                    spans.push((lo, hi));
                }
                LegacyScheduleEntry::Unknown(what) => {
                    log.event_error(ectx.legacy_id(), &format!("Unexpected timetable entry: {}", what));
                }
            }
        }
        Ok(spans)
    }
}

impl Migrator<EventContext> for Timetable {
    fn name(&self) -> &'static str {
        "timetable"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        if ectx.obj.get("_schedule").is_none() {
            self.ctx.log.event_error(ectx.legacy_id(), "Event has no schedule");
            return Ok(Outcome::Skipped("no schedule".into()));
        }
        let entries = ectx.legacy.schedule.clone();
        let spans = self.migrate_entries(ectx, &entries, None)?;
        if spans.is_empty() {
            return Ok(Outcome::Skipped("empty timetable".into()));
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{conference, site};
    use crate::core::logger::Level;
    use crate::steps::testing::harness;
    use serde_json::json;

    #[test]
    fn blocks_contain_their_children() {
        let h = harness(site(
            &["0x100", "0x101"],
            json!({
                "0x100": conference("42", Some("0x11"), json!({
                    "sessions": [{"$ref": "0x130"}],
                    "contributions": [{"$ref": "0x140"}],
                    "_schedule": [{"$ref": "0x150"}, {"$ref": "0x151"}, {"$ref": "0x152"}, {"$ref": "0x153"}]
                })),
                "0x130": {"class": "MaKaC.conference.Session", "state": {"id": "s1", "title": "Morning"}},
                "0x131": {"class": "MaKaC.conference.Session", "state": {"id": "s9", "title": "Ghost"}},
                "0x140": {"class": "MaKaC.conference.Contribution", "state": {"id": "1", "title": "Talk", "duration": 60}},
                "0x150": {"class": "MaKaC.schedule.BreakTimeSchEntry", "state": {
                    "title": "Coffee", "startDate": "2015-03-01T12:00:00+00:00", "duration": 30
                }},
                "0x151": {"class": "MaKaC.schedule.LinkedTimeSchEntry", "state": {
                    "startDate": "2015-03-01T09:00:00+00:00", "duration": 60, "_owner": {"$ref": "0x160"}
                }},
                "0x160": {"class": "MaKaC.conference.SessionSlot", "state": {
                    "session": {"$ref": "0x130"}, "title": "Slot", "_schedule": [{"$ref": "0x170"}]
                }},
                "0x170": {"class": "MaKaC.schedule.ContribSchEntry", "state": {
                    "startDate": "2015-03-01T09:30:00+00:00", "duration": 60, "_owner": {"$ref": "0x140"}
                }},
                "0x152": {"class": "MaKaC.schedule.LinkedTimeSchEntry", "state": {
                    "startDate": "2015-03-01T14:00:00+00:00", "duration": 60, "_owner": {"$ref": "0x161"}
                }},
                "0x161": {"class": "MaKaC.conference.SessionSlot", "state": {"session": {"$ref": "0x131"}}},
                "0x153": {"class": "MaKaC.schedule.ContribSchEntry", "state": {
                    "startDate": "2015-03-01T16:00:00+00:00", "duration": 10, "_owner": {"$ref": "0x999"}
                }},
                "0x101": conference("43", Some("0x11"), json!({}))
            }),
        ));
        h.run("users").unwrap();
        h.run("categories").unwrap();
        h.run("events").unwrap();

        assert_eq!(h.count("SELECT COUNT(*) FROM timetable_entries WHERE event_id = 42 AND type = 'break' AND title = 'Coffee'"), 1);
        assert_eq!(
            h.count("SELECT COUNT(*) FROM timetable_entries WHERE type = 'block' AND title = 'Slot' AND duration_minutes = 90"),
            1
        );
        assert_eq!(
            h.count("SELECT COUNT(*) FROM timetable_entries c JOIN timetable_entries b ON b.id = c.parent_id
                     WHERE c.type = 'contribution' AND b.type = 'block'"),
            1
        );
        assert_eq!(
            h.count("SELECT COUNT(*) FROM contributions c JOIN sessions s ON s.id = c.session_id WHERE s.title = 'Morning'"),
            1
        );
        assert_eq!(h.count("SELECT COUNT(*) FROM sessions WHERE title = 'Ghost' AND friendly_id = 2"), 1);
        assert!(h.log.contains(Level::Warning, "Found zombie session s9"));
        assert!(h.log.contains(Level::Warning, "end violated"));
        assert!(h.log.contains(Level::Warning, "unknown contribution"));
        assert!(h.log.contains(Level::Error, "Event has no schedule"));
    }
}
