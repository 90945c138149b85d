//! Settings that point at migrated categories and events.

use crate::core::decode::{self, UpcomingEntry};
use crate::core::error::Result;
use crate::core::graph::{Attr, LegacyGraph, LegacyObject};
use crate::core::migration::{Migrator, Outcome, StepContext, WholeGraph};
use crate::core::namespace::{NsValue, global};
use serde_json::json;
use std::rc::Rc;

const MODULE: &str = "upcoming_events";

pub struct GlobalPostEvents {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> Result<Box<dyn Migrator<WholeGraph>>> {
    Ok(Box::new(GlobalPostEvents { ctx: ctx.clone() }))
}

/// The upcoming-events module, stored at the root or in the `modules` map.
fn upcoming_module(graph: &dyn LegacyGraph) -> Result<Option<Rc<LegacyObject>>> {
    if let Some(obj) = decode::root_object(graph, MODULE)? {
        return Ok(Some(obj));
    }
    match graph.root_entry("modules") {
        Some(Attr::Map(map)) => match map.get(MODULE).and_then(Attr::as_ref_oid) {
            Some(oid) => Ok(graph.contains(oid).then(|| graph.load(oid)).transpose()?),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

impl GlobalPostEvents {
    fn migrate_upcoming(&self) -> Result<bool> {
        let ctx = &self.ctx;
        let graph = ctx.graph.as_ref();
        let Some(obj) = upcoming_module(graph)? else {
            return Ok(false);
        };
        let upcoming = decode::upcoming(graph, &obj)?;
        ctx.dest
            .set_setting(MODULE, "max_entries", &json!(upcoming.max_entries))?;

        let mut entries = Vec::with_capacity(upcoming.entries.len());
        for entry in &upcoming.entries {
            let (kind, key, legacy_id, weight, days) = match entry {
                UpcomingEntry::Category { id, weight, days } => {
                    ("category", global::LEGACY_CATEGORY_IDS, id, weight, days)
                }
                UpcomingEntry::Event { id, weight, days } => {
                    ("event", global::LEGACY_EVENT_IDS, id, weight, days)
                }
            };
            let target = ctx
                .global
                .borrow()
                .lookup_entity(key, &NsValue::from(legacy_id.as_str()))?;
            let Some(target) = target else {
                ctx.log.warning(&format!(
                    "invalid id for upcoming events: {} (category: {})",
                    legacy_id,
                    kind == "category"
                ));
                continue;
            };
            entries.push(json!({"weight": weight, "days": days, "type": kind, "id": target.id}));
        }
        ctx.dest.set_setting(MODULE, "entries", &json!(entries))?;
        ctx.log
            .success(&format!("{} upcoming event entries", entries.len()));
        Ok(true)
    }
}

impl Migrator<WholeGraph> for GlobalPostEvents {
    fn name(&self) -> &'static str {
        "global_post_events"
    }

    fn run(&mut self, _unit: &mut WholeGraph) -> Result<Outcome> {
        if !self.migrate_upcoming()? {
            return Ok(Outcome::Skipped("no upcoming events module".into()));
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::Level;
    use crate::steps::events::fixtures::{conference, site};
    use crate::steps::testing::harness;

    #[test]
    fn upcoming_entries_are_resolved() {
        let mut dump = site(
            &["0x100"],
            json!({
                "0x100": conference("42", Some("0x11"), json!({})),
                "0x400": {"class": "MaKaC.modules.upcoming.ObservedObjectsModule", "state": {
                    "_maxEvents": 5,
                    "_objects": [{"$ref": "0x401"}, {"$ref": "0x402"}, {"$ref": "0x403"}]
                }},
                "0x401": {"class": "MaKaC.modules.upcoming.ObservedObject", "state": {
                    "obj": {"$ref": "0x11"}, "weight": 1.5, "advertisingDelta": 7
                }},
                "0x402": {"class": "MaKaC.modules.upcoming.ObservedObject", "state": {
                    "obj": {"$ref": "0x100"}, "weight": 2, "advertisingDelta": 3
                }},
                "0x403": {"class": "MaKaC.modules.upcoming.ObservedObject", "state": {
                    "obj": {"$ref": "0x404"}, "weight": 1, "advertisingDelta": 1
                }},
                "0x404": {"class": "MaKaC.conference.Conference", "state": {"id": "999"}}
            }),
        );
        dump["root"]["modules"] = json!({"upcoming_events": {"$ref": "0x400"}});
        let h = harness(dump);
        h.run("users").unwrap();
        h.run("categories").unwrap();
        h.run("events").unwrap();
        h.run("global_post_events").unwrap();

        assert_eq!(h.ctx.dest.setting(MODULE, "max_entries").unwrap().as_deref(), Some("5"));
        let entries: serde_json::Value =
            serde_json::from_str(&h.ctx.dest.setting(MODULE, "entries").unwrap().unwrap()).unwrap();
        assert_eq!(
            entries,
            json!([
                {"weight": 1.5, "days": 7, "type": "category", "id": 1},
                {"weight": 2.0, "days": 3, "type": "event", "id": 42}
            ])
        );
        assert!(h.log.contains(Level::Warning, "invalid id for upcoming events: 999"));
    }

    #[test]
    fn skipped_without_module() {
        let h = harness(json!({"root": {}, "objects": {}}));
        assert!(matches!(h.run("global_post_events").unwrap(), Outcome::Skipped(_)));
    }
}
