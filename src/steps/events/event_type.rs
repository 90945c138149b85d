//! Event type from the legacy web-factory registry.

use super::{EventContext, EventMigrator};
use crate::core::decode;
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::namespace::{NsValue, global};
use rusqlite::params;

pub struct EventType {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(EventType { ctx: ctx.clone() })
}

pub fn event_type(factory: Option<&str>) -> Option<&'static str> {
    match factory {
        None => Some("conference"),
        Some("simple_event") => Some("lecture"),
        Some("meeting") => Some("meeting"),
        Some(_) => None,
    }
}

impl Migrator<EventContext> for EventType {
    fn name(&self) -> &'static str {
        "event_type"
    }

    fn prepare(&mut self) -> Result<()> {
        if !self.ctx.global.borrow().map(global::WF_REGISTRY)?.is_empty() {
            return Ok(());
        }
        let registry = decode::webfactory_registry(self.ctx.graph.as_ref())?;
        let mut ns = self.ctx.global.borrow_mut();
        for (event_id, factory) in registry {
            match factory {
                Some(wf) if event_type(Some(&wf)).is_some() => {
                    ns.insert(global::WF_REGISTRY, event_id, wf)?;
                }
                Some(wf) => self
                    .ctx
                    .log
                    .warning(&format!("Unknown web factory '{}' for event {}", wf, event_id)),
                None => {}
            }
        }
        Ok(())
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        let factory = self
            .ctx
            .global
            .borrow()
            .lookup(global::WF_REGISTRY, &NsValue::from(ectx.legacy_id()))?;
        let kind = event_type(factory.as_ref().and_then(NsValue::as_str)).unwrap_or("conference");
        self.ctx.dest.execute(
            "UPDATE events SET type = ?1 WHERE id = ?2",
            params![kind, ectx.event_id],
        )?;
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{conference, site};
    use super::*;
    use crate::steps::testing::harness;
    use serde_json::json;

    #[test]
    fn factory_names() {
        assert_eq!(event_type(None), Some("conference"));
        assert_eq!(event_type(Some("simple_event")), Some("lecture"));
        assert_eq!(event_type(Some("meeting")), Some("meeting"));
        assert_eq!(event_type(Some("poster")), None);
    }

    #[test]
    fn registry_drives_the_type() {
        let mut dump = site(
            &["0x100", "0x101", "0x102"],
            json!({
                "0x100": conference("1", Some("0x11"), json!({})),
                "0x101": conference("2", Some("0x11"), json!({})),
                "0x102": conference("3", Some("0x11"), json!({})),
                "0x300": {"class": "MaKaC.webinterface.simple_event.WebFactory", "state": {}},
                "0x301": {"class": "MaKaC.webinterface.meeting.WebFactory", "state": {}}
            }),
        );
        dump["root"]["webfactoryregistry"] = json!({"2": {"$ref": "0x300"}, "3": {"$ref": "0x301"}});
        let h = harness(dump);
        h.run("users").unwrap();
        h.run("categories").unwrap();
        h.run("events").unwrap();
        assert_eq!(h.count("SELECT COUNT(*) FROM events WHERE id = 1 AND type = 'conference'"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM events WHERE id = 2 AND type = 'lecture'"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM events WHERE id = 3 AND type = 'meeting'"), 1);
    }
}
