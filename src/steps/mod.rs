//! The top-level migration steps, in the order they must run.
//!
//! Each step reads what earlier steps left in the global namespace and adds
//! its own mappings for the ones after it. `events` is itself a driver over
//! the event-scoped migrators in [`events`].

use crate::core::decode::{self, LegacyInfo, LegacyPrincipal};
use crate::core::error::{MigrateError, Result};
use crate::core::graph::{FLUSH_EVERY, LegacyGraph, LegacyObject, Oid, flushing};
use crate::core::logger::progress;
use crate::core::migration::{StepContext, StepSpec, TxScope};
use crate::core::namespace::{NsValue, global};
use crate::core::principal::{self, Grant, Principal};
use chrono_tz::Tz;
use std::rc::Rc;

pub mod categories;
pub mod events;
pub mod global_post_events;
pub mod global_pre_events;
pub mod room_bookings;
pub mod rooms_locations;
pub mod users_groups;

pub fn all_steps() -> Vec<StepSpec> {
    vec![
        StepSpec {
            name: "global_pre_events",
            description: "Global settings, IP networks and domains",
            scope: TxScope::PerStep,
            build: global_pre_events::build,
        },
        StepSpec {
            name: "users",
            description: "Users, identities and groups",
            scope: TxScope::PerStep,
            build: users_groups::build,
        },
        StepSpec {
            name: "rooms_locations",
            description: "Room booking locations and rooms",
            scope: TxScope::PerStep,
            build: rooms_locations::build,
        },
        StepSpec {
            name: "categories",
            description: "Category tree and category ACLs",
            scope: TxScope::PerStep,
            build: categories::build,
        },
        StepSpec {
            name: "events",
            description: "Events and their contents",
            scope: TxScope::SelfManaged,
            build: events::build,
        },
        StepSpec {
            name: "room_bookings",
            description: "Room reservations",
            scope: TxScope::PerStep,
            build: room_bookings::build,
        },
        StepSpec {
            name: "global_post_events",
            description: "Settings that reference events and categories",
            scope: TxScope::PerStep,
            build: global_post_events::build,
        },
    ]
}

/// Server-wide settings object, or defaults when the dump has none.
pub(crate) fn server_info(graph: &dyn LegacyGraph) -> Result<LegacyInfo> {
    match decode::root_object(graph, "MaKaCInfo")? {
        Some(obj) => decode::info(graph, &obj),
        None => Ok(LegacyInfo {
            timezone: "UTC".to_string(),
            ..LegacyInfo::default()
        }),
    }
}

pub(crate) fn server_tz(graph: &dyn LegacyGraph) -> Result<Tz> {
    Ok(crate::core::time::parse_tz(&server_info(graph)?.timezone).unwrap_or(chrono_tz::UTC))
}

/// Visit every object in `oids` with progress reporting, flushing the graph
/// cache on the usual interval. Dangling ids are warned about and skipped.
pub(crate) fn each_object<F>(
    ctx: &StepContext,
    graph: &dyn LegacyGraph,
    label: &str,
    oids: Vec<Oid>,
    mut f: F,
) -> Result<()>
where
    F: FnMut(Rc<LegacyObject>) -> Result<()>,
{
    let log = Rc::clone(&ctx.log);
    for oid in flushing(graph, progress(log.as_ref(), label, oids), FLUSH_EVERY) {
        let obj = match graph.load(oid) {
            Ok(obj) => obj,
            Err(MigrateError::MissingObject(id)) => {
                log.warning(&format!("Skipping missing object {}", id));
                continue;
            }
            Err(e) => return Err(e),
        };
        f(obj)?;
    }
    Ok(())
}

/// Destination user for a legacy user id, following merges.
pub(crate) fn user_by_legacy_id(ctx: &StepContext, id: &str) -> Result<Option<i64>> {
    Ok(ctx
        .global
        .borrow()
        .lookup_entity(global::AVATAR_MERGED_USER, &NsValue::from(id))?
        .map(|e| e.id))
}

pub(crate) fn system_user(ctx: &StepContext) -> Result<i64> {
    ctx.principals.system_user()?.ok_or_else(|| {
        MigrateError::OrderingViolation("system user requested before the users step".into())
    })
}

/// Resolve `principals` and add `grant` for each one that resolves.
pub(crate) fn grant_all(
    ctx: &StepContext,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    principals: &[LegacyPrincipal],
    grant: &Grant,
    context: &str,
) -> Result<usize> {
    let resolved = ctx.principals.resolve_all(principals, context)?;
    for p in &resolved {
        principal::grant(&ctx.dest, table, owner_column, owner_id, p, grant)?;
    }
    Ok(resolved.len())
}

/// Read access for the IP network group of every known domain. Returns
/// how many domains were granted.
pub(crate) fn grant_domains(
    ctx: &StepContext,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    domains: &[String],
    context: &str,
) -> Result<usize> {
    let mut granted = 0;
    for name in domains {
        let network = ctx
            .global
            .borrow()
            .lookup_entity(global::IP_DOMAINS, &NsValue::from(name.to_lowercase()))?;
        match network {
            Some(group) => {
                principal::grant(
                    &ctx.dest,
                    table,
                    owner_column,
                    owner_id,
                    &Principal::Network(group.id),
                    &Grant::read(),
                )?;
                granted += 1;
            }
            None => ctx.log.warning(&format!(
                "Skipping unknown protection domain '{}' in {}",
                name, context
            )),
        }
    }
    Ok(granted)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_run_in_dependency_order() {
        let names: Vec<&str> = all_steps().iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "global_pre_events",
                "users",
                "rooms_locations",
                "categories",
                "events",
                "room_bookings",
                "global_post_events",
            ]
        );
    }

    #[test]
    fn only_events_manages_its_own_transactions() {
        for step in all_steps() {
            let expected = if step.name == "events" {
                TxScope::SelfManaged
            } else {
                TxScope::PerStep
            };
            assert_eq!(step.scope, expected, "{}", step.name);
        }
    }
}
