//! Room-booking locations and rooms, recorded in `venue_mapping` and
//! `room_mapping` for the event location lookup.

use crate::core::decode;
use crate::core::error::{MigrateError, Result};
use crate::core::migration::{Migrator, Outcome, StepContext, WholeGraph};
use crate::core::namespace::{NsValue, global};
use crate::core::refs::{EntityKind, EntityRef};
use crate::steps::{each_object, system_user, user_by_legacy_id};
use rusqlite::params;

pub struct RoomsLocations {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> Result<Box<dyn Migrator<WholeGraph>>> {
    Ok(Box::new(RoomsLocations { ctx: ctx.clone() }))
}

impl RoomsLocations {
    fn migrate_locations(&self) -> Result<()> {
        let ctx = &self.ctx;
        let Some(rb) = ctx.rb_graph.as_deref() else {
            return Ok(());
        };
        each_object(ctx, rb, "Locations", rb.collection("Locations")?, |obj| {
            let location = decode::location(&obj);
            let id = ctx.dest.insert(
                "INSERT INTO locations (name, is_default) VALUES (?1, ?2)",
                params![location.name, location.is_default],
            )?;
            ctx.global.borrow_mut().insert(
                global::VENUE_MAPPING,
                NsValue::from(location.name.as_str()),
                EntityRef::new(EntityKind::Location, id),
            )?;
            ctx.log.info(&format!("Location {}", location.name));
            Ok(())
        })
    }

    fn migrate_rooms(&self) -> Result<()> {
        let ctx = &self.ctx;
        let Some(rb) = ctx.rb_graph.as_deref() else {
            return Ok(());
        };
        each_object(ctx, rb, "Rooms", rb.collection("Rooms")?, |obj| {
            let room = match decode::room(&obj) {
                Ok(room) => room,
                Err(MigrateError::LegacyData(msg)) => {
                    ctx.log.warning(&format!("Skipping room: {}", msg));
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let location = ctx.global.borrow().lookup_entity(
                global::VENUE_MAPPING,
                &NsValue::from(room.location_name.as_str()),
            )?;
            let Some(location) = location else {
                ctx.log.warning(&format!(
                    "Skipping room {}: unknown location '{}'",
                    room.id, room.location_name
                ));
                return Ok(());
            };
            let name = if room.name.trim().is_empty() {
                format!("{}-{}-{}", room.building, room.floor, room.number)
            } else {
                room.name.trim().to_string()
            };
            let owner = match room.responsible_id.as_deref() {
                Some(legacy) => user_by_legacy_id(ctx, legacy)?,
                None => None,
            };
            let owner = match owner {
                Some(owner) => owner,
                None => {
                    ctx.log.warning(&format!(
                        "Room {} has no valid owner ({}); using the system user",
                        room.id,
                        room.responsible_id.as_deref().unwrap_or("none")
                    ));
                    system_user(ctx)?
                }
            };
            ctx.dest.execute(
                "INSERT INTO rooms (id, location_id, name, building, floor, number, owner_id, capacity,
                 is_active, is_reservable)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    room.id,
                    location.id,
                    name,
                    room.building,
                    room.floor,
                    room.number,
                    owner,
                    room.capacity,
                    room.is_active,
                    room.is_reservable
                ],
            )?;
            ctx.global.borrow_mut().insert(
                global::ROOM_MAPPING,
                NsValue::pair(room.location_name.as_str(), name.as_str()),
                NsValue::pair(location, EntityRef::new(EntityKind::Room, room.id)),
            )?;
            Ok(())
        })
    }
}

impl Migrator<WholeGraph> for RoomsLocations {
    fn name(&self) -> &'static str {
        "rooms_locations"
    }

    fn run(&mut self, _unit: &mut WholeGraph) -> Result<Outcome> {
        if self.ctx.rb_graph.is_none() {
            return Ok(Outcome::Skipped("no room booking data".into()));
        }
        self.migrate_locations()?;
        self.migrate_rooms()?;
        Ok(Outcome::Done)
    }

    fn finish(&mut self) -> Result<()> {
        self.ctx.dest.fix_sequences(&["locations", "rooms"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::Level;
    use crate::steps::testing::harness;
    use serde_json::json;

    #[test]
    fn rooms_need_a_known_location() {
        let h = harness(json!({
            "root": {
                "avatars": {"1": {"$ref": "0x1"}},
                "Locations": [{"$ref": "0x10"}],
                "Rooms": [{"$ref": "0x20"}, {"$ref": "0x21"}, {"$ref": "0x22"}]
            },
            "objects": {
                "0x1": {"class": "MaKaC.user.Avatar", "state": {"id": "1", "name": "Ada", "email": "ada@example.org"}},
                "0x10": {"class": "MaKaC.plugins.RoomBooking.default.factory.Location", "state": {
                    "friendlyName": "CERN", "isDefault": true
                }},
                "0x20": {"class": "MaKaC.plugins.RoomBooking.default.room.Room", "state": {
                    "id": 57, "locationName": "CERN", "name": "", "building": "40", "floor": "S2",
                    "roomNr": "C01", "responsibleId": "1"
                }},
                "0x21": {"class": "MaKaC.plugins.RoomBooking.default.room.Room", "state": {
                    "id": 58, "locationName": "CERN", "name": "Main Auditorium", "responsibleId": "99"
                }},
                "0x22": {"class": "MaKaC.plugins.RoomBooking.default.room.Room", "state": {
                    "id": 59, "locationName": "Mars", "name": "Crater"
                }}
            }
        }));
        h.run("users").unwrap();
        h.run("rooms_locations").unwrap();

        assert_eq!(h.count("SELECT COUNT(*) FROM locations WHERE is_default = 1"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM rooms"), 2);
        assert_eq!(h.count("SELECT COUNT(*) FROM rooms WHERE id = 57 AND name = '40-S2-C01' AND owner_id = 1"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM rooms WHERE id = 58 AND owner_id = 0"), 1);
        assert!(h.log.contains(Level::Warning, "unknown location 'Mars'"));
        assert!(h.log.contains(Level::Warning, "Room 58 has no valid owner"));

        let ns = h.ctx.global.borrow();
        assert!(ns
            .lookup(global::ROOM_MAPPING, &NsValue::pair("CERN", "Main Auditorium"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn skipped_without_room_booking_data() {
        let mut h = harness(json!({"root": {}, "objects": {}}));
        h.ctx.rb_graph = None;
        let outcome = h.run("rooms_locations").unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
    }
}
