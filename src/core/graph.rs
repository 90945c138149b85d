//! Read-only access to the legacy object graph.
//!
//! The legacy store is a tree of persistent objects addressed by opaque
//! object ids. Objects are loaded lazily and cached until [`LegacyGraph::sync`]
//! drops the cache, which long iterations do every [`FLUSH_EVERY`] items to
//! keep memory bounded.
//!
//! [`JsonGraph`] reads an object dump of the form
//! `{"root": {...}, "objects": {"0x1f": {"class": "mod.Name", "state": {...}}}}`
//! where `{"$ref": "0x1f"}` inside any attribute points at another object.

use crate::core::error::{MigrateError, Result};
use crate::core::refs::{LegacyKind, LegacyRef};
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;

pub const FLUSH_EVERY: usize = 5000;

/// Module prefixes whose classes can still be decoded.
const KNOWN_MODULES: &[&str] = &["MaKaC", "BTrees", "persistent", "indico", "__builtin__"];

/// Old module paths that moved before the dump was taken.
const MODULE_ALIASES: &[(&str, &str)] = &[
    ("IndexedCatalog.BTrees", "BTrees"),
    ("PersistentMapping", "persistent.mapping"),
    ("PersistentList", "persistent.list"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(pub u64);

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl FromStr for Oid {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u64::from_str_radix(digits, 16)
            .map(Oid)
            .map_err(|_| MigrateError::LegacyData(format!("invalid object id '{}'", s)))
    }
}

/// A decoded attribute value of a legacy object.
#[derive(Clone, Debug, PartialEq)]
pub enum Attr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Attr>),
    Map(BTreeMap<String, Attr>),
    Ref(Oid),
}

impl Attr {
    pub fn from_json(value: &JsonValue) -> Result<Attr> {
        Ok(match value {
            JsonValue::Null => Attr::Null,
            JsonValue::Bool(b) => Attr::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Attr::Int(i),
                None => Attr::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Attr::Str(s.clone()),
            JsonValue::Array(items) => {
                Attr::List(items.iter().map(Attr::from_json).collect::<Result<_>>()?)
            }
            JsonValue::Object(map) => {
                if map.len() == 1 {
                    if let Some(JsonValue::String(oid)) = map.get("$ref") {
                        return Ok(Attr::Ref(oid.parse()?));
                    }
                }
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), Attr::from_json(v)?);
                }
                Attr::Map(out)
            }
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Attr::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attr::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integers, and strings holding integers.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attr::Int(i) => Some(*i),
            Attr::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Attr::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attr::Bool(b) => Some(*b),
            Attr::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_ref_oid(&self) -> Option<Oid> {
        match self {
            Attr::Ref(oid) => Some(*oid),
            _ => None,
        }
    }

    /// Text form of scalar ids, which the legacy store keeps as either.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Attr::Str(s) => Some(s.clone()),
            Attr::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Elements of a list, or the values of a mapping in key order.
    pub fn items(&self) -> Vec<&Attr> {
        match self {
            Attr::List(items) => items.iter().collect(),
            Attr::Map(map) => map.values().collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRef {
    pub module: String,
    pub name: String,
    /// The defining module no longer exists; state is kept, behaviour is not.
    pub broken: bool,
}

impl ClassRef {
    pub fn parse(dotted: &str) -> ClassRef {
        let (module, name) = match dotted.rsplit_once('.') {
            Some((m, n)) => (m.to_string(), n.to_string()),
            None => (String::new(), dotted.to_string()),
        };
        let module = MODULE_ALIASES
            .iter()
            .find(|(old, _)| module == *old || module.starts_with(&format!("{}.", old)))
            .map(|(old, new)| format!("{}{}", new, &module[old.len()..]))
            .unwrap_or(module);
        let root = module.split('.').next().unwrap_or_default();
        let broken = !KNOWN_MODULES.contains(&root);
        ClassRef {
            module,
            name,
            broken,
        }
    }

    pub fn dotted(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }
}

#[derive(Clone, Debug)]
pub struct LegacyObject {
    pub oid: Oid,
    pub class: ClassRef,
    pub state: BTreeMap<String, Attr>,
}

impl LegacyObject {
    pub fn legacy_ref(&self) -> LegacyRef {
        LegacyRef {
            oid: self.oid,
            kind: self.kind(),
        }
    }

    pub fn kind(&self) -> LegacyKind {
        if self.class.broken {
            LegacyKind::Other
        } else {
            LegacyKind::from_class_name(&self.class.name)
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    /// Attribute value; explicit nulls read as missing.
    pub fn get(&self, key: &str) -> Option<&Attr> {
        self.state.get(key).filter(|a| !a.is_null())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Attr::as_str)
    }

    pub fn string(&self, key: &str) -> String {
        self.str(key).unwrap_or_default().to_string()
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Attr::as_int)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(Attr::as_bool).unwrap_or(false)
    }

    pub fn key(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Attr::as_key)
    }

    pub fn reference(&self, key: &str) -> Option<Oid> {
        self.get(key).and_then(Attr::as_ref_oid)
    }

    /// All object references held by a list- or mapping-valued attribute.
    pub fn refs(&self, key: &str) -> Vec<Oid> {
        self.get(key)
            .map(|a| a.items().into_iter().filter_map(Attr::as_ref_oid).collect())
            .unwrap_or_default()
    }

    pub fn strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|a| {
                a.items()
                    .into_iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First element of a list attribute, or the attribute itself if it is a string.
    pub fn first_string(&self, key: &str) -> String {
        match self.get(key) {
            Some(Attr::Str(s)) => s.clone(),
            Some(a) => a
                .items()
                .first()
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_string(),
            None => String::new(),
        }
    }
}

/// Read-only view over the legacy store.
pub trait LegacyGraph {
    fn root_entry(&self, name: &str) -> Option<Attr>;

    fn load(&self, oid: Oid) -> Result<Rc<LegacyObject>>;

    fn contains(&self, oid: Oid) -> bool;

    /// Drop cached objects. References already handed out stay valid.
    fn sync(&self);

    /// Object ids of a top-level collection in natural order. A missing
    /// collection is empty.
    fn collection(&self, name: &str) -> Result<Vec<Oid>> {
        let Some(entry) = self.root_entry(name) else {
            return Ok(Vec::new());
        };
        let holder = match entry {
            Attr::Ref(oid) => {
                let obj = self.load(oid)?;
                match obj.state.get("data").or_else(|| obj.state.get("items")) {
                    Some(inner) => inner.clone(),
                    None => Attr::Map(obj.state.clone()),
                }
            }
            other => other,
        };
        Ok(holder
            .items()
            .into_iter()
            .filter_map(Attr::as_ref_oid)
            .collect())
    }

    /// Load an object referenced by attribute `key` of `obj`.
    fn follow(&self, obj: &LegacyObject, key: &str) -> Result<Option<Rc<LegacyObject>>> {
        match obj.reference(key) {
            Some(oid) => self.load(oid).map(Some),
            None => Ok(None),
        }
    }
}

/// A [`LegacyGraph`] backed by a JSON object dump.
pub struct JsonGraph {
    root: BTreeMap<String, Attr>,
    raw: FxHashMap<Oid, JsonValue>,
    cache: RefCell<FxHashMap<Oid, Rc<LegacyObject>>>,
    syncs: Cell<usize>,
}

impl JsonGraph {
    /// Open a dump given as a plain path or a `file://` URI.
    pub fn open(uri: &str) -> Result<Self> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let text = fs::read_to_string(Path::new(path))?;
        let value: JsonValue = serde_json::from_str(&text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: JsonValue) -> Result<Self> {
        let mut root = BTreeMap::new();
        if let Some(entries) = value.get("root").and_then(JsonValue::as_object) {
            for (k, v) in entries {
                root.insert(k.clone(), Attr::from_json(v)?);
            }
        } else {
            return Err(MigrateError::LegacyData(
                "dump has no 'root' object".to_string(),
            ));
        }
        let mut raw = FxHashMap::default();
        if let Some(objects) = value.get("objects").and_then(JsonValue::as_object) {
            for (oid, obj) in objects {
                raw.insert(oid.parse()?, obj.clone());
            }
        }
        Ok(Self {
            root,
            raw,
            cache: RefCell::new(FxHashMap::default()),
            syncs: Cell::new(0),
        })
    }

    pub fn cached_objects(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.get()
    }

    fn decode(&self, oid: Oid, raw: &JsonValue) -> Result<LegacyObject> {
        let class = raw
            .get("class")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| MigrateError::LegacyData(format!("object {} has no class", oid)))?;
        let mut state = BTreeMap::new();
        if let Some(attrs) = raw.get("state").and_then(JsonValue::as_object) {
            for (k, v) in attrs {
                state.insert(k.clone(), Attr::from_json(v)?);
            }
        }
        Ok(LegacyObject {
            oid,
            class: ClassRef::parse(class),
            state,
        })
    }
}

impl LegacyGraph for JsonGraph {
    fn root_entry(&self, name: &str) -> Option<Attr> {
        self.root.get(name).filter(|a| !a.is_null()).cloned()
    }

    fn load(&self, oid: Oid) -> Result<Rc<LegacyObject>> {
        if let Some(obj) = self.cache.borrow().get(&oid) {
            return Ok(Rc::clone(obj));
        }
        let raw = self
            .raw
            .get(&oid)
            .ok_or_else(|| MigrateError::MissingObject(oid.to_string()))?;
        let obj = Rc::new(self.decode(oid, raw)?);
        self.cache.borrow_mut().insert(oid, Rc::clone(&obj));
        Ok(obj)
    }

    fn contains(&self, oid: Oid) -> bool {
        self.raw.contains_key(&oid)
    }

    fn sync(&self) {
        self.cache.borrow_mut().clear();
        self.syncs.set(self.syncs.get() + 1);
    }
}

/// Iterator adapter that flushes the graph cache every `every` items.
pub struct Flushing<'g, I> {
    inner: I,
    graph: &'g dyn LegacyGraph,
    every: usize,
    seen: usize,
}

impl<I: Iterator> Iterator for Flushing<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let item = self.inner.next()?;
        self.seen += 1;
        if self.every > 0 && self.seen % self.every == 0 {
            self.graph.sync();
        }
        Some(item)
    }
}

pub fn flushing<'g, I: IntoIterator>(
    graph: &'g dyn LegacyGraph,
    iter: I,
    every: usize,
) -> Flushing<'g, I::IntoIter> {
    Flushing {
        inner: iter.into_iter(),
        graph,
        every,
        seen: 0,
    }
}
