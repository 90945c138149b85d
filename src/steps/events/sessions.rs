//! Sessions and contributions, with per-event friendly ids.

use super::{EventContext, EventMigrator};
use crate::core::decode::{self, LegacySession};
use crate::core::error::{MigrateError, Result};
use crate::core::graph::Oid;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::namespace::{NsValue, event};
use crate::core::refs::{EntityKind, EntityRef, LegacyKind, LegacyRef};
use crate::core::text::sanitize_user_input;
use rusqlite::params;
use std::collections::BTreeSet;

pub struct SessionsContributions {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(SessionsContributions { ctx: ctx.clone() })
}

pub fn session_key(oid: Oid) -> NsValue {
    NsValue::Legacy(LegacyRef {
        oid,
        kind: LegacyKind::Session,
    })
}

pub fn contribution_key(oid: Oid) -> NsValue {
    NsValue::Legacy(LegacyRef {
        oid,
        kind: LegacyKind::Contribution,
    })
}

/// Friendly ids for legacy ids in order. Numeric ids keep their value the
/// first time they appear; duplicates and non-numeric ids are numbered
/// after the highest one.
pub fn allocate_friendly_ids(ids: &[String], prefix: &str) -> Vec<i64> {
    let mut out = vec![0; ids.len()];
    let mut used = BTreeSet::new();
    let mut rest = Vec::new();
    for (i, raw) in ids.iter().enumerate() {
        let stripped = raw.strip_prefix(prefix).unwrap_or(raw);
        match stripped.parse::<i64>() {
            Ok(n) if n > 0 && used.insert(n) => out[i] = n,
            _ => rest.push(i),
        }
    }
    let mut next = used.last().copied().unwrap_or(0);
    for i in rest {
        next += 1;
        out[i] = next;
    }
    out
}

/// Insert one session. Without a friendly id (a session only reachable
/// from the timetable) the next free one is used.
pub fn migrate_session(
    ctx: &StepContext,
    ectx: &EventContext,
    session: &LegacySession,
    friendly_id: Option<i64>,
) -> Result<i64> {
    let friendly_id = match friendly_id {
        Some(id) => id,
        None => {
            ectx.ns
                .borrow()
                .set(event::SESSION_FRIENDLY_IDS)?
                .iter()
                .filter_map(NsValue::as_int)
                .max()
                .unwrap_or(0)
                + 1
        }
    };
    let id = ctx.dest.insert(
        "INSERT INTO sessions (event_id, friendly_id, title, description) VALUES (?1, ?2, ?3, ?4)",
        params![
            ectx.event_id,
            friendly_id,
            sanitize_user_input(&session.title),
            session.description.trim()
        ],
    )?;
    let mapped = ctx.dest.count(
        "SELECT COUNT(*) FROM legacy_session_mappings WHERE event_id = ?1 AND legacy_session_id = ?2",
        params![ectx.event_id, session.id],
    )?;
    if mapped == 0 {
        ctx.dest.execute(
            "INSERT INTO legacy_session_mappings (event_id, legacy_session_id, session_id) VALUES (?1, ?2, ?3)",
            params![ectx.event_id, session.id, id],
        )?;
    } else {
        ctx.log.event_warning(
            ectx.legacy_id(),
            &format!("Duplicate session id; not adding legacy mapping for {}", session.id),
        );
    }
    let mut ns = ectx.ns.borrow_mut();
    ns.insert(
        event::LEGACY_SESSION_MAP,
        session_key(session.oid),
        EntityRef::new(EntityKind::Session, id),
    )?;
    ns.set_mut(event::SESSION_FRIENDLY_IDS)?
        .insert(NsValue::Int(friendly_id));
    Ok(id)
}

impl SessionsContributions {
    fn migrate_sessions(&self, ectx: &EventContext) -> Result<usize> {
        let graph = self.ctx.graph.as_ref();
        let mut sessions = Vec::with_capacity(ectx.legacy.sessions.len());
        for oid in &ectx.legacy.sessions {
            match graph.load(*oid) {
                Ok(obj) => sessions.push(decode::session(&obj)),
                Err(MigrateError::MissingObject(_)) => self
                    .ctx
                    .log
                    .event_warning(ectx.legacy_id(), &format!("Skipping missing session {}", oid)),
                Err(e) => return Err(e),
            }
        }
        let ids: Vec<String> = sessions.iter().map(|s| s.id.clone()).collect();
        let friendly = allocate_friendly_ids(&ids, "s");
        for (session, friendly_id) in sessions.iter().zip(friendly) {
            migrate_session(&self.ctx, ectx, session, Some(friendly_id))?;
        }
        Ok(sessions.len())
    }

    fn migrate_contributions(&self, ectx: &EventContext) -> Result<usize> {
        let graph = self.ctx.graph.as_ref();
        let mut contributions = Vec::with_capacity(ectx.legacy.contributions.len());
        for oid in &ectx.legacy.contributions {
            match graph.load(*oid) {
                Ok(obj) => contributions.push(decode::contribution(graph, &obj)?),
                Err(MigrateError::MissingObject(_)) => self
                    .ctx
                    .log
                    .event_warning(ectx.legacy_id(), &format!("Skipping missing contribution {}", oid)),
                Err(e) => return Err(e),
            }
        }
        let ids: Vec<String> = contributions.iter().map(|c| c.id.clone()).collect();
        let friendly = allocate_friendly_ids(&ids, "");
        for (contrib, friendly_id) in contributions.iter().zip(friendly) {
            let session = match contrib.session {
                Some(oid) => ectx
                    .ns
                    .borrow()
                    .lookup_entity(event::LEGACY_SESSION_MAP, &session_key(oid))?
                    .map(|s| s.id),
                None => None,
            };
            if contrib.withdrawn {
                self.ctx.log.event_info(
                    ectx.legacy_id(),
                    &format!("Contribution {} was withdrawn; migrating as deleted", contrib.id),
                );
            }
            let id = self.ctx.dest.insert(
                "INSERT INTO contributions (event_id, session_id, friendly_id, title, description,
                 duration_minutes, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    ectx.event_id,
                    session,
                    friendly_id,
                    sanitize_user_input(&contrib.title),
                    contrib.description.trim(),
                    contrib.duration_minutes,
                    contrib.withdrawn
                ],
            )?;
            self.ctx.dest.execute(
                "INSERT OR IGNORE INTO legacy_contribution_mappings (event_id, legacy_contribution_id, contribution_id)
                 VALUES (?1, ?2, ?3)",
                params![ectx.event_id, contrib.id, id],
            )?;
            ectx.ns.borrow_mut().insert(
                event::LEGACY_CONTRIBUTION_MAP,
                contribution_key(contrib.oid),
                EntityRef::new(EntityKind::Contribution, id),
            )?;
        }
        Ok(contributions.len())
    }
}

impl Migrator<EventContext> for SessionsContributions {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        let sessions = self.migrate_sessions(ectx)?;
        let contributions = self.migrate_contributions(ectx)?;
        if sessions + contributions == 0 {
            return Ok(Outcome::Skipped("no sessions or contributions".into()));
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{conference, site};
    use super::*;
    use crate::steps::testing::harness;
    use serde_json::json;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn numeric_ids_are_kept() {
        assert_eq!(allocate_friendly_ids(&ids(&["3", "1", "2"]), ""), vec![3, 1, 2]);
    }

    #[test]
    fn duplicates_and_odd_ids_go_last() {
        assert_eq!(
            allocate_friendly_ids(&ids(&["s1", "s3", "s3", "x"]), "s"),
            vec![1, 3, 4, 5]
        );
        assert_eq!(allocate_friendly_ids(&ids(&["s1t2", "0"]), ""), vec![1, 2]);
        assert!(allocate_friendly_ids(&[], "s").is_empty());
    }

    #[test]
    fn sessions_and_contributions_are_linked() {
        let h = harness(site(
            &["0x100"],
            json!({
                "0x100": conference("42", Some("0x11"), json!({
                    "sessions": [{"$ref": "0x130"}, {"$ref": "0x131"}],
                    "contributions": [{"$ref": "0x140"}, {"$ref": "0x141"}]
                })),
                "0x130": {"class": "MaKaC.conference.Session", "state": {"id": "s2", "title": "Plenary"}},
                "0x131": {"class": "MaKaC.conference.Session", "state": {"id": "s2", "title": "Posters"}},
                "0x140": {"class": "MaKaC.conference.Contribution", "state": {
                    "id": "7", "title": "Talk", "duration": 20, "_session": {"$ref": "0x131"}
                }},
                "0x141": {"class": "MaKaC.conference.Contribution", "state": {
                    "id": "8", "title": "Gone", "_status": {"$ref": "0x142"}
                }},
                "0x142": {"class": "MaKaC.conference.ContribStatusWithdrawn", "state": {}}
            }),
        ));
        h.run("users").unwrap();
        h.run("categories").unwrap();
        h.run("events").unwrap();

        assert_eq!(h.count("SELECT COUNT(*) FROM sessions WHERE event_id = 42"), 2);
        assert_eq!(h.count("SELECT COUNT(*) FROM sessions WHERE title = 'Posters' AND friendly_id = 3"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM legacy_session_mappings WHERE event_id = 42"), 1);
        assert_eq!(
            h.count("SELECT COUNT(*) FROM contributions c JOIN sessions s ON s.id = c.session_id
                     WHERE c.friendly_id = 7 AND s.title = 'Posters' AND c.duration_minutes = 20"),
            1
        );
        assert_eq!(h.count("SELECT COUNT(*) FROM contributions WHERE friendly_id = 8 AND is_deleted = 1"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM legacy_contribution_mappings WHERE event_id = 42"), 2);
    }
}
