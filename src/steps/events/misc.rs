//! Location, creation date, visibility, keywords and contact email.

use super::{EventContext, EventMigrator};
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::namespace::{NsValue, event, global};
use crate::core::refs::EntityRef;
use crate::core::text::{is_valid_mail, sanitize_email};
use crate::core::time::to_db;
use rusqlite::params;

pub struct EventMisc {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(EventMisc { ctx: ctx.clone() })
}

impl EventMisc {
    /// `(venue, room)` ids, preferring an exact room match.
    fn location(&self, venue: &str, room: &str) -> Result<(Option<i64>, Option<i64>, &'static str)> {
        if venue.is_empty() {
            return Ok((None, None, "none"));
        }
        let ns = self.ctx.global.borrow();
        if let Some(NsValue::Tuple(pair)) = ns.lookup(global::ROOM_MAPPING, &NsValue::pair(venue, room))? {
            let ids: Vec<Option<EntityRef>> = pair.iter().map(NsValue::as_entity).collect();
            if let [Some(loc), Some(room)] = ids.as_slice() {
                return Ok((Some(loc.id), Some(room.id), "room"));
            }
        }
        if let Some(loc) = ns.lookup_entity(global::VENUE_MAPPING, &NsValue::from(venue))? {
            return Ok((Some(loc.id), None, "venue"));
        }
        Ok((None, None, "text"))
    }
}

impl Migrator<EventContext> for EventMisc {
    fn name(&self) -> &'static str {
        "misc"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        let legacy = &ectx.legacy;
        self.ctx.global.borrow_mut().insert(
            global::LEGACY_EVENT_IDS,
            NsValue::from(legacy.id.as_str()),
            EntityRef::event(ectx.event_id),
        )?;

        let venue = legacy.venue_name.trim();
        let room = legacy.room_name.trim();
        let (venue_id, room_id, source) = self.location(venue, room)?;
        ectx.ns
            .borrow_mut()
            .insert(event::MISC_DATA, "location", source)?;

        let visibility = match legacy.visibility {
            Some(v) if v > 900 => None,
            other => other,
        };
        let support = sanitize_email(&legacy.support_email);
        let contact_email = if is_valid_mail(&support) {
            support
        } else {
            if !legacy.support_email.trim().is_empty() {
                self.ctx.log.event_warning(
                    ectx.legacy_id(),
                    &format!("Invalid support email '{}'", legacy.support_email.trim()),
                );
            }
            self.ctx.config.default_email.clone()
        };
        let keywords = serde_json::to_string(&legacy.keywords)?;

        self.ctx.dest.execute(
            "UPDATE events SET venue_name = ?1, room_name = ?2, address = ?3, own_venue_id = ?4,
             own_room_id = ?5, created_dt = ?6, visibility = ?7, keywords = ?8, contact_email = ?9
             WHERE id = ?10",
            params![
                venue,
                room,
                legacy.address.trim(),
                venue_id,
                room_id,
                legacy.created.map(|c| to_db(c.to_utc(ectx.tz))),
                visibility,
                keywords,
                contact_email,
                ectx.event_id
            ],
        )?;
        Ok(Outcome::Done)
    }
}
