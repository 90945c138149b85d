//! Restore-point encoding of namespace values.
//!
//! Destination references encode as `{"entity": ["User", 7]}` and legacy
//! references as `{"legacy": "0x1f"}`. On decode both are re-resolved, and a
//! reference that no longer resolves decodes to nothing.

use crate::core::db::Destination;
use crate::core::error::{MigrateError, Result};
use crate::core::graph::{LegacyGraph, Oid};
use crate::core::namespace::{Container, ContainerKind, NsValue};
use crate::core::refs::{EntityKind, EntityRef, LegacyRef};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, BTreeSet};

pub trait RefResolver {
    /// `None` if the row was never persisted.
    fn resolve_entity(&self, entity: EntityRef) -> Result<Option<EntityRef>>;

    fn resolve_legacy(&self, oid: Oid) -> Result<Option<LegacyRef>>;
}

/// Resolves against the live destination store and legacy graph.
pub struct LiveResolver<'a> {
    pub dest: &'a Destination,
    pub graph: &'a dyn LegacyGraph,
}

impl RefResolver for LiveResolver<'_> {
    fn resolve_entity(&self, entity: EntityRef) -> Result<Option<EntityRef>> {
        Ok(self
            .dest
            .row_exists(entity.kind.table(), entity.id)?
            .then_some(entity))
    }

    fn resolve_legacy(&self, oid: Oid) -> Result<Option<LegacyRef>> {
        if !self.graph.contains(oid) {
            return Ok(None);
        }
        Ok(Some(self.graph.load(oid)?.legacy_ref()))
    }
}

pub fn encode_value(value: &NsValue) -> JsonValue {
    match value {
        NsValue::Bool(b) => json!(b),
        NsValue::Int(i) => json!(i),
        NsValue::Str(s) => json!(s),
        NsValue::Entity(e) => json!({"entity": [e.kind.name(), e.id]}),
        NsValue::Legacy(r) => json!({"legacy": r.oid.to_string()}),
        NsValue::Tuple(items) => json!({"tuple": items.iter().map(encode_value).collect::<Vec<_>>()}),
    }
}

fn malformed(what: &str, raw: &JsonValue) -> MigrateError {
    MigrateError::RestoreMismatch(format!("malformed {}: {}", what, raw))
}

pub fn decode_value(raw: &JsonValue, resolver: &dyn RefResolver) -> Result<Option<NsValue>> {
    match raw {
        JsonValue::Bool(b) => Ok(Some(NsValue::Bool(*b))),
        JsonValue::Number(n) => n
            .as_i64()
            .map(|i| Some(NsValue::Int(i)))
            .ok_or_else(|| malformed("integer", raw)),
        JsonValue::String(s) => Ok(Some(NsValue::Str(s.clone()))),
        JsonValue::Object(map) => {
            if let Some(entity) = map.get("entity") {
                let parts = entity.as_array().ok_or_else(|| malformed("entity", raw))?;
                let (Some(kind), Some(id)) = (
                    parts.first().and_then(JsonValue::as_str),
                    parts.get(1).and_then(JsonValue::as_i64),
                ) else {
                    return Err(malformed("entity", raw));
                };
                let kind: EntityKind = kind.parse().map_err(MigrateError::RestoreMismatch)?;
                Ok(resolver
                    .resolve_entity(EntityRef::new(kind, id))?
                    .map(NsValue::Entity))
            } else if let Some(oid) = map.get("legacy") {
                let oid: Oid = oid
                    .as_str()
                    .ok_or_else(|| malformed("legacy reference", raw))?
                    .parse()?;
                Ok(resolver.resolve_legacy(oid)?.map(NsValue::Legacy))
            } else if let Some(items) = map.get("tuple") {
                let items = items.as_array().ok_or_else(|| malformed("tuple", raw))?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match decode_value(item, resolver)? {
                        Some(v) => out.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Some(NsValue::Tuple(out)))
            } else {
                Err(malformed("value", raw))
            }
        }
        JsonValue::Null | JsonValue::Array(_) => Err(malformed("value", raw)),
    }
}

pub fn encode_container(container: &Container) -> JsonValue {
    match container {
        Container::Map(m) => json!({
            "kind": "dict",
            "entries": m.iter().map(|(k, v)| json!([encode_value(k), encode_value(v)])).collect::<Vec<_>>(),
        }),
        Container::Set(s) => json!({
            "kind": "set",
            "items": s.iter().map(encode_value).collect::<Vec<_>>(),
        }),
        Container::SetMap(m) => json!({
            "kind": "setdict",
            "entries": m
                .iter()
                .map(|(k, vs)| json!([encode_value(k), vs.iter().map(encode_value).collect::<Vec<_>>()]))
                .collect::<Vec<_>>(),
        }),
        Container::Slot(v) => json!({
            "kind": "slot",
            "value": v.as_ref().map(encode_value),
        }),
    }
}

fn pairs<'a>(raw: &'a JsonValue, what: &str) -> Result<Vec<(&'a JsonValue, &'a JsonValue)>> {
    let entries = raw
        .get("entries")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| malformed(what, raw))?;
    entries
        .iter()
        .map(|e| match e.as_array().map(Vec::as_slice) {
            Some([k, v]) => Ok((k, v)),
            _ => Err(malformed(what, e)),
        })
        .collect()
}

/// Decode a container of the declared `kind`. Returns the container and the
/// number of entries dropped because a reference no longer resolves.
pub fn decode_container(
    kind: ContainerKind,
    raw: &JsonValue,
    resolver: &dyn RefResolver,
) -> Result<(Container, usize)> {
    let found = raw
        .get("kind")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| malformed("container", raw))?;
    if found != kind.name() {
        return Err(MigrateError::RestoreMismatch(format!(
            "expected a {} container, found {}",
            kind.name(),
            found
        )));
    }
    let mut dropped = 0;
    let container = match kind {
        ContainerKind::Map => {
            let mut out = BTreeMap::new();
            for (k, v) in pairs(raw, "dict")? {
                match (decode_value(k, resolver)?, decode_value(v, resolver)?) {
                    (Some(k), Some(v)) => {
                        out.insert(k, v);
                    }
                    _ => dropped += 1,
                }
            }
            Container::Map(out)
        }
        ContainerKind::Set => {
            let items = raw
                .get("items")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| malformed("set", raw))?;
            let mut out = BTreeSet::new();
            for item in items {
                match decode_value(item, resolver)? {
                    Some(v) => {
                        out.insert(v);
                    }
                    None => dropped += 1,
                }
            }
            Container::Set(out)
        }
        ContainerKind::SetMap => {
            let mut out = BTreeMap::new();
            for (k, vs) in pairs(raw, "setdict")? {
                let Some(k) = decode_value(k, resolver)? else {
                    dropped += 1;
                    continue;
                };
                let items = vs.as_array().ok_or_else(|| malformed("setdict", vs))?;
                let mut set = BTreeSet::new();
                for item in items {
                    match decode_value(item, resolver)? {
                        Some(v) => {
                            set.insert(v);
                        }
                        None => dropped += 1,
                    }
                }
                out.insert(k, set);
            }
            Container::SetMap(out)
        }
        ContainerKind::Slot => {
            let value = match raw.get("value") {
                None | Some(JsonValue::Null) => None,
                Some(v) => {
                    let decoded = decode_value(v, resolver)?;
                    if decoded.is_none() {
                        dropped += 1;
                    }
                    decoded
                }
            };
            Container::Slot(value)
        }
    };
    Ok((container, dropped))
}
