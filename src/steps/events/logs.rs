//! Event action and email logs.

use super::{EventContext, EventMigrator};
use crate::core::decode;
use crate::core::error::{MigrateError, Result};
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::namespace::{NsValue, global};
use crate::core::time::to_db;
use rusqlite::params;

pub struct EventLogs {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(EventLogs { ctx: ctx.clone() })
}

/// Canonical module name for a legacy log entry.
pub fn normalize_module(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return "Unknown".to_string();
    }
    let raw = raw.strip_prefix("Collaboration").map(str::trim_start).unwrap_or(raw);
    let lower = raw.to_lowercase();
    if lower.is_empty() {
        return "Collaboration".to_string();
    }
    if lower.contains("chat") || lower.contains("xmpp") {
        return "Chat".to_string();
    }
    if lower == "vc_vidyo" || lower == "vidyo" {
        return "Vidyo".to_string();
    }
    if lower == "timetable/subcontribution" {
        return "Timetable/Subcontribution".to_string();
    }
    if raw.chars().all(|c| !c.is_uppercase()) {
        let mut chars = raw.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    raw.to_string()
}

impl Migrator<EventContext> for EventLogs {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        if ectx.legacy.log.is_empty() {
            return Ok(Outcome::Skipped("no log entries".into()));
        }
        let graph = self.ctx.graph.as_ref();
        let mut migrated = 0usize;
        for oid in &ectx.legacy.log {
            let obj = match graph.load(*oid) {
                Ok(obj) => obj,
                Err(MigrateError::MissingObject(_)) => continue,
                Err(e) => return Err(e),
            };
            let item = decode::log_item(graph, &obj)?;
            let Some(logged) = item.logged else {
                self.ctx
                    .log
                    .event_warning(ectx.legacy_id(), &format!("Skipping log entry {} without date", oid));
                continue;
            };
            let user = match &item.responsible {
                Some(u) => self
                    .ctx
                    .global
                    .borrow()
                    .lookup_entity(global::AVATAR_MERGED_USER, &NsValue::from(u.id.as_str()))?
                    .map(|e| e.id),
                None => None,
            };
            let (realm, kind, summary) = if item.is_email {
                ("emails", "email", format!("Sent email: {}", item.subject.trim()))
            } else if item.subject.trim().is_empty() {
                ("event", "simple", "Unknown action".to_string())
            } else {
                ("event", "simple", item.subject.trim().to_string())
            };
            self.ctx.dest.execute(
                "INSERT INTO event_logs (event_id, realm, kind, module, type, summary, user_id, logged_dt, data)
                 VALUES (?1, ?2, 'other', ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    ectx.event_id,
                    realm,
                    normalize_module(&item.module),
                    kind,
                    summary,
                    user,
                    to_db(logged.to_utc(ectx.tz)),
                    item.info.to_string()
                ],
            )?;
            migrated += 1;
        }
        tracing::debug!(target: "conf_migrate", event = %ectx.legacy.id, migrated, "log entries");
        Ok(Outcome::Done)
    }
}
