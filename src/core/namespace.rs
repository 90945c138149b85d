//! Named bags of mutable containers shared across migration steps.
//!
//! A [`SharedNamespace`] is declared once with a fixed set of keys, each
//! bound to a container kind. Steps read and extend the containers as they
//! go; the whole namespace is what a restore point captures.

use crate::core::codec::{self, RefResolver};
use crate::core::error::{MigrateError, Result};
use crate::core::refs::{EntityRef, LegacyRef};
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

pub type NsHandle = Rc<RefCell<SharedNamespace>>;

/// Scalar or reference stored in a namespace container.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NsValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Entity(EntityRef),
    Legacy(LegacyRef),
    Tuple(Vec<NsValue>),
}

impl NsValue {
    pub fn as_entity(&self) -> Option<EntityRef> {
        match self {
            NsValue::Entity(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NsValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            NsValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn pair(a: impl Into<NsValue>, b: impl Into<NsValue>) -> NsValue {
        NsValue::Tuple(vec![a.into(), b.into()])
    }
}

impl From<EntityRef> for NsValue {
    fn from(e: EntityRef) -> Self {
        NsValue::Entity(e)
    }
}

impl From<LegacyRef> for NsValue {
    fn from(r: LegacyRef) -> Self {
        NsValue::Legacy(r)
    }
}

impl From<&str> for NsValue {
    fn from(s: &str) -> Self {
        NsValue::Str(s.to_string())
    }
}

impl From<String> for NsValue {
    fn from(s: String) -> Self {
        NsValue::Str(s)
    }
}

impl From<i64> for NsValue {
    fn from(i: i64) -> Self {
        NsValue::Int(i)
    }
}

impl From<bool> for NsValue {
    fn from(b: bool) -> Self {
        NsValue::Bool(b)
    }
}

impl fmt::Display for NsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NsValue::Bool(b) => write!(f, "{}", b),
            NsValue::Int(i) => write!(f, "{}", i),
            NsValue::Str(s) => write!(f, "{}", s),
            NsValue::Entity(e) => write!(f, "{}", e),
            NsValue::Legacy(r) => write!(f, "{}", r),
            NsValue::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Map,
    Set,
    /// Map whose missing keys read as an empty set.
    SetMap,
    /// Single optional value.
    Slot,
}

impl ContainerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Map => "dict",
            ContainerKind::Set => "set",
            ContainerKind::SetMap => "setdict",
            ContainerKind::Slot => "slot",
        }
    }

    pub fn empty(&self) -> Container {
        match self {
            ContainerKind::Map => Container::Map(BTreeMap::new()),
            ContainerKind::Set => Container::Set(BTreeSet::new()),
            ContainerKind::SetMap => Container::SetMap(BTreeMap::new()),
            ContainerKind::Slot => Container::Slot(None),
        }
    }
}

impl FromStr for ContainerKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dict" => Ok(ContainerKind::Map),
            "set" => Ok(ContainerKind::Set),
            "setdict" => Ok(ContainerKind::SetMap),
            "slot" => Ok(ContainerKind::Slot),
            other => Err(MigrateError::RestoreMismatch(format!(
                "unknown container kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Container {
    Map(BTreeMap<NsValue, NsValue>),
    Set(BTreeSet<NsValue>),
    SetMap(BTreeMap<NsValue, BTreeSet<NsValue>>),
    Slot(Option<NsValue>),
}

impl Container {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::Map(_) => ContainerKind::Map,
            Container::Set(_) => ContainerKind::Set,
            Container::SetMap(_) => ContainerKind::SetMap,
            Container::Slot(_) => ContainerKind::Slot,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Container::Map(m) => m.len(),
            Container::Set(s) => s.len(),
            Container::SetMap(m) => m.len(),
            Container::Slot(v) => usize::from(v.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Contents of a namespace at one point in time.
pub struct Checkpoint(BTreeMap<String, Container>);

pub struct SharedNamespace {
    name: String,
    declared: Vec<(String, ContainerKind)>,
    stores: BTreeMap<String, Container>,
}

impl SharedNamespace {
    pub fn new(name: &str, declared: &[(&str, ContainerKind)]) -> Self {
        let declared: Vec<(String, ContainerKind)> = declared
            .iter()
            .map(|(k, kind)| (k.to_string(), *kind))
            .collect();
        let stores = declared
            .iter()
            .map(|(k, kind)| (k.clone(), kind.empty()))
            .collect();
        Self {
            name: name.to_string(),
            declared,
            stores,
        }
    }

    pub fn into_handle(self) -> NsHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.stores.clone())
    }

    /// Drop every write made since `checkpoint` was taken.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.stores = checkpoint.0;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(|(k, _)| k.as_str())
    }

    fn kind_of(&self, key: &str) -> Result<ContainerKind> {
        self.declared
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| self.unknown(key))
    }

    fn unknown(&self, key: &str) -> MigrateError {
        MigrateError::UnknownNamespaceKey {
            namespace: self.name.clone(),
            key: key.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Result<&Container> {
        self.stores.get(key).ok_or_else(|| self.unknown(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut Container> {
        match self.stores.get_mut(key) {
            Some(c) => Ok(c),
            None => Err(MigrateError::UnknownNamespaceKey {
                namespace: self.name.clone(),
                key: key.to_string(),
            }),
        }
    }

    pub fn map(&self, key: &str) -> Result<&BTreeMap<NsValue, NsValue>> {
        match self.get(key)? {
            Container::Map(m) => Ok(m),
            other => Err(wrong(key, ContainerKind::Map, other)),
        }
    }

    pub fn map_mut(&mut self, key: &str) -> Result<&mut BTreeMap<NsValue, NsValue>> {
        match self.get_mut(key)? {
            Container::Map(m) => Ok(m),
            other => Err(wrong(key, ContainerKind::Map, other)),
        }
    }

    pub fn set(&self, key: &str) -> Result<&BTreeSet<NsValue>> {
        match self.get(key)? {
            Container::Set(s) => Ok(s),
            other => Err(wrong(key, ContainerKind::Set, other)),
        }
    }

    pub fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<NsValue>> {
        match self.get_mut(key)? {
            Container::Set(s) => Ok(s),
            other => Err(wrong(key, ContainerKind::Set, other)),
        }
    }

    pub fn setmap(&self, key: &str) -> Result<&BTreeMap<NsValue, BTreeSet<NsValue>>> {
        match self.get(key)? {
            Container::SetMap(m) => Ok(m),
            other => Err(wrong(key, ContainerKind::SetMap, other)),
        }
    }

    /// Set stored under `entry`, created empty on first access.
    pub fn setmap_entry(&mut self, key: &str, entry: NsValue) -> Result<&mut BTreeSet<NsValue>> {
        match self.get_mut(key)? {
            Container::SetMap(m) => Ok(m.entry(entry).or_default()),
            other => Err(wrong(key, ContainerKind::SetMap, other)),
        }
    }

    pub fn slot(&self, key: &str) -> Result<Option<&NsValue>> {
        match self.get(key)? {
            Container::Slot(v) => Ok(v.as_ref()),
            other => Err(wrong(key, ContainerKind::Slot, other)),
        }
    }

    pub fn put_slot(&mut self, key: &str, value: Option<NsValue>) -> Result<()> {
        match self.get_mut(key)? {
            Container::Slot(v) => {
                *v = value;
                Ok(())
            }
            other => Err(wrong(key, ContainerKind::Slot, other)),
        }
    }

    /// `map[key][k]`, cloned.
    pub fn lookup(&self, key: &str, k: &NsValue) -> Result<Option<NsValue>> {
        Ok(self.map(key)?.get(k).cloned())
    }

    pub fn lookup_entity(&self, key: &str, k: &NsValue) -> Result<Option<EntityRef>> {
        Ok(self.map(key)?.get(k).and_then(NsValue::as_entity))
    }

    pub fn insert(&mut self, key: &str, k: impl Into<NsValue>, v: impl Into<NsValue>) -> Result<()> {
        self.map_mut(key)?.insert(k.into(), v.into());
        Ok(())
    }

    pub fn serialize(&self) -> JsonValue {
        let mut out = serde_json::Map::new();
        for (key, container) in &self.stores {
            out.insert(key.clone(), codec::encode_container(container));
        }
        JsonValue::Object(out)
    }

    /// Overwrite every container present in `data`. Returns the number of
    /// references dropped because they no longer resolve.
    pub fn load(&mut self, data: &JsonValue, resolver: &dyn RefResolver) -> Result<usize> {
        let entries = data.as_object().ok_or_else(|| {
            MigrateError::RestoreMismatch(format!("namespace '{}' is not an object", self.name))
        })?;
        let mut dropped = 0;
        let mut decoded = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            let kind = self.kind_of(key).map_err(|_| {
                MigrateError::RestoreMismatch(format!(
                    "namespace '{}' has no key '{}'",
                    self.name, key
                ))
            })?;
            let (container, lost) = codec::decode_container(kind, raw, resolver)?;
            dropped += lost;
            decoded.push((key.clone(), container));
        }
        self.stores.extend(decoded);
        Ok(dropped)
    }
}

fn wrong(key: &str, expected: ContainerKind, actual: &Container) -> MigrateError {
    MigrateError::WrongContainer {
        key: key.to_string(),
        expected: expected.name(),
        actual: actual.kind().name(),
    }
}

/// Keys of the run-wide namespace.
pub mod global {
    pub const NAME: &str = "global_ns";

    pub const USER_FAVORITE_CATEGORIES: &str = "user_favorite_categories";
    pub const ROOM_MAPPING: &str = "room_mapping";
    pub const VENUE_MAPPING: &str = "venue_mapping";
    pub const LEGACY_EVENT_IDS: &str = "legacy_event_ids";
    pub const LEGACY_CATEGORY_IDS: &str = "legacy_category_ids";
    pub const WF_REGISTRY: &str = "wf_registry";
    pub const USED_SHORT_URLS: &str = "used_short_urls";
    pub const IP_DOMAINS: &str = "ip_domains";
    pub const AVATAR_MERGED_USER: &str = "avatar_merged_user";
    pub const ALL_GROUPS: &str = "all_groups";
    pub const USERS_BY_PRIMARY_EMAIL: &str = "users_by_primary_email";
    pub const USERS_BY_SECONDARY_EMAIL: &str = "users_by_secondary_email";
    pub const USERS_BY_EMAIL: &str = "users_by_email";
    pub const LOSTANDFOUND_CATEGORY: &str = "lostandfound_category";
    pub const SYSTEM_USER: &str = "system_user";
    pub const EVENT_ID_COUNTER: &str = "event_id_counter";
    pub const MIGRATED_EVENTS: &str = "migrated_events";
}

/// Keys of the per-event namespace.
pub mod event {
    pub const NAME: &str = "event_ns";

    pub const LEGACY_SESSION_MAP: &str = "legacy_session_map";
    pub const LEGACY_CONTRIBUTION_MAP: &str = "legacy_contribution_map";
    pub const SESSION_FRIENDLY_IDS: &str = "session_friendly_ids";
    pub const MISC_DATA: &str = "misc_data";
}

pub fn global_namespace() -> SharedNamespace {
    use global::*;
    SharedNamespace::new(
        NAME,
        &[
            (USER_FAVORITE_CATEGORIES, ContainerKind::SetMap),
            (ROOM_MAPPING, ContainerKind::Map),
            (VENUE_MAPPING, ContainerKind::Map),
            (LEGACY_EVENT_IDS, ContainerKind::Map),
            (LEGACY_CATEGORY_IDS, ContainerKind::Map),
            (WF_REGISTRY, ContainerKind::Map),
            (USED_SHORT_URLS, ContainerKind::Map),
            (IP_DOMAINS, ContainerKind::Map),
            (AVATAR_MERGED_USER, ContainerKind::Map),
            (ALL_GROUPS, ContainerKind::Map),
            (USERS_BY_PRIMARY_EMAIL, ContainerKind::Map),
            (USERS_BY_SECONDARY_EMAIL, ContainerKind::Map),
            (USERS_BY_EMAIL, ContainerKind::Map),
            (LOSTANDFOUND_CATEGORY, ContainerKind::Slot),
            (SYSTEM_USER, ContainerKind::Slot),
            (EVENT_ID_COUNTER, ContainerKind::Slot),
            (MIGRATED_EVENTS, ContainerKind::Set),
        ],
    )
}

pub fn event_namespace() -> SharedNamespace {
    use event::*;
    SharedNamespace::new(
        NAME,
        &[
            (LEGACY_SESSION_MAP, ContainerKind::Map),
            (LEGACY_CONTRIBUTION_MAP, ContainerKind::Map),
            (SESSION_FRIENDLY_IDS, ContainerKind::Set),
            (MISC_DATA, ContainerKind::Map),
        ],
    )
}
