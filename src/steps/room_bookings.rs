//! Room reservations. Runs after events so bookings never block the
//! event step's transactions.

use crate::core::decode;
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext, WholeGraph};
use crate::core::time::to_db;
use crate::steps::{each_object, server_tz, user_by_legacy_id};
use rusqlite::params;

pub struct RoomBookings {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> Result<Box<dyn Migrator<WholeGraph>>> {
    Ok(Box::new(RoomBookings { ctx: ctx.clone() }))
}

impl Migrator<WholeGraph> for RoomBookings {
    fn name(&self) -> &'static str {
        "room_bookings"
    }

    fn run(&mut self, _unit: &mut WholeGraph) -> Result<Outcome> {
        let ctx = &self.ctx;
        let Some(rb) = ctx.rb_graph.as_deref() else {
            return Ok(Outcome::Skipped("no room booking data".into()));
        };
        let tz = server_tz(ctx.graph.as_ref())?;
        let mut migrated = 0usize;
        each_object(ctx, rb, "Reservations", rb.collection("Reservations")?, |obj| {
            let resv = decode::reservation(rb, &obj)?;
            let room = match resv.room_id {
                Some(id) if ctx.dest.row_exists("rooms", id)? => id,
                other => {
                    ctx.log.error(&format!(
                        "Skipping reservation {} for dead room {}",
                        obj.oid,
                        other.map(|id| id.to_string()).unwrap_or_else(|| "?".into())
                    ));
                    return Ok(());
                }
            };
            let (Some(start), Some(end)) = (resv.start, resv.end) else {
                ctx.log
                    .warning(&format!("Skipping reservation {} without dates", obj.oid));
                return Ok(());
            };
            let booked_for = match resv.booked_for_id.as_deref() {
                Some(id) => user_by_legacy_id(ctx, id)?,
                None => None,
            };
            let created_by = match resv.created_by.as_deref() {
                Some(id) => user_by_legacy_id(ctx, id)?,
                None => None,
            };
            ctx.dest.execute(
                "INSERT INTO reservations (room_id, start_dt, end_dt, booked_for_id, booked_for_name,
                 created_by_id, booking_reason, is_cancelled, is_rejected)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    room,
                    to_db(start.to_utc(tz)),
                    to_db(end.to_utc(tz)),
                    booked_for,
                    resv.booked_for_name.trim(),
                    created_by,
                    resv.reason.trim(),
                    resv.is_cancelled,
                    resv.is_rejected
                ],
            )?;
            migrated += 1;
            Ok(())
        })?;
        ctx.log.success(&format!("{} reservations", migrated));
        Ok(Outcome::Done)
    }
}
