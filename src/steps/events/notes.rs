//! Minutes files become event notes.

use super::attachments::{linked_objects, load_material, minutes_file};
use super::{EventContext, EventMigrator};
use crate::core::decode::LegacyResource;
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::steps::system_user;
use rusqlite::params;

pub struct Notes {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(Notes { ctx: ctx.clone() })
}

/// UTF-8 when valid, Latin-1 otherwise.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

impl Migrator<EventContext> for Notes {
    fn name(&self) -> &'static str {
        "notes"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        let log = &self.ctx.log;
        let mut migrated = 0;
        for linked in linked_objects(&self.ctx, ectx)? {
            let Some(oid) = linked.minutes else { continue };
            let Some(material) = load_material(&self.ctx, oid)? else {
                continue;
            };
            let Some(LegacyResource::File { archived_path, .. }) =
                minutes_file(&material).map(|i| &material.resources[i])
            else {
                continue;
            };
            if material.protection > 0 {
                log.event_warning(
                    ectx.legacy_id(),
                    &format!("{} minutes have special permissions; skipping them", linked.label),
                );
                continue;
            }
            let bytes = match archived_path {
                Some(path) => self.ctx.files.read(path)?,
                None => None,
            };
            let Some(bytes) = bytes else {
                log.event_error(
                    ectx.legacy_id(),
                    &format!("{} minutes not found on disk; skipping them", linked.label),
                );
                continue;
            };
            let html = decode_text(bytes);
            let html = html.trim();
            if html.is_empty() {
                log.event_warning(ectx.legacy_id(), &format!("{} minutes are empty; skipping them", linked.label));
                continue;
            }
            self.ctx.dest.execute(
                "INSERT INTO event_notes (event_id, link_type, session_id, contribution_id, html, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ectx.event_id,
                    linked.link_type,
                    linked.session_id,
                    linked.contribution_id,
                    html,
                    system_user(&self.ctx)?
                ],
            )?;
            migrated += 1;
        }
        if migrated == 0 {
            return Ok(Outcome::Skipped("no minutes".into()));
        }
        Ok(Outcome::Done)
    }
}
