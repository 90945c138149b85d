use super::{EventContext, EventMigrator};
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext};
use rusqlite::params;

/// Records old event ids that did not survive as the new id, so legacy
/// URLs keep working.
pub struct LegacyEventId {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(LegacyEventId { ctx: ctx.clone() })
}

impl Migrator<EventContext> for LegacyEventId {
    fn name(&self) -> &'static str {
        "legacy_id"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        if ectx.event_id.to_string() == ectx.legacy.id {
            return Ok(Outcome::Skipped("id kept".into()));
        }
        self.ctx.dest.execute(
            "INSERT INTO legacy_event_mappings (legacy_event_id, event_id) VALUES (?1, ?2)",
            params![ectx.legacy.id, ectx.event_id],
        )?;
        self.ctx.log.event_info(
            ectx.legacy_id(),
            &format!("Legacy event id {} mapped to {}", ectx.legacy.id, ectx.event_id),
        );
        Ok(Outcome::Done)
    }
}
