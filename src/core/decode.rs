//! Typed views over legacy objects.
//!
//! This is the only module that looks at legacy class names and attribute
//! spellings. Everything downstream works with the records defined here.

use crate::core::error::{MigrateError, Result};
use crate::core::graph::{Attr, LegacyGraph, LegacyObject, Oid};
use crate::core::time::LegacyDateTime;
use regex::Regex;
use std::rc::Rc;
use std::sync::LazyLock;

fn datetime(obj: &LegacyObject, key: &str) -> Option<LegacyDateTime> {
    obj.str(key).and_then(LegacyDateTime::parse)
}

fn id_of(obj: &LegacyObject) -> String {
    obj.key("id").unwrap_or_default()
}

/// Load, treating a dangling reference as absent.
fn load_opt(graph: &dyn LegacyGraph, oid: Oid) -> Result<Option<Rc<LegacyObject>>> {
    match graph.load(oid) {
        Ok(obj) => Ok(Some(obj)),
        Err(MigrateError::MissingObject(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

// --- Principals ---

#[derive(Clone, Debug, PartialEq)]
pub struct LegacyUserRef {
    pub oid: Oid,
    pub id: String,
    /// Email recorded on the legacy object, used when the id is unknown.
    pub email: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LegacyPrincipal {
    User(LegacyUserRef),
    Group(String),
    ExternalGroup(String),
    Email(String),
    Unsupported(String),
}

impl LegacyPrincipal {
    pub fn describe(&self) -> String {
        match self {
            LegacyPrincipal::User(u) => format!("user {}", u.id),
            LegacyPrincipal::Group(id) => format!("group {}", id),
            LegacyPrincipal::ExternalGroup(name) => format!("external group {}", name),
            LegacyPrincipal::Email(email) => format!("email {}", email),
            LegacyPrincipal::Unsupported(what) => format!("unsupported principal {}", what),
        }
    }
}

pub fn principal(graph: &dyn LegacyGraph, attr: &Attr) -> Result<Option<LegacyPrincipal>> {
    match attr {
        Attr::Str(s) if !s.trim().is_empty() => Ok(Some(LegacyPrincipal::Email(s.trim().to_string()))),
        Attr::Ref(oid) => {
            let Some(obj) = load_opt(graph, *oid)? else {
                return Ok(Some(LegacyPrincipal::Unsupported(format!("missing object {}", oid))));
            };
            if obj.class.broken {
                return Ok(Some(LegacyPrincipal::Unsupported(obj.class.dotted())));
            }
            Ok(Some(match obj.class_name() {
                "Avatar" => LegacyPrincipal::User(LegacyUserRef {
                    oid: obj.oid,
                    id: id_of(&obj),
                    email: obj.string("email"),
                }),
                "Group" => LegacyPrincipal::Group(id_of(&obj)),
                "CERNGroup" | "LDAPGroup" | "NiceGroup" | "LDAPGroupWrapper" => {
                    LegacyPrincipal::ExternalGroup(obj.key("id").or_else(|| obj.key("name")).unwrap_or_default())
                }
                other => LegacyPrincipal::Unsupported(other.to_string()),
            }))
        }
        _ => Ok(None),
    }
}

pub fn principals(graph: &dyn LegacyGraph, obj: &LegacyObject, key: &str) -> Result<Vec<LegacyPrincipal>> {
    let mut out = Vec::new();
    if let Some(attr) = obj.get(key) {
        for item in attr.items() {
            if let Some(p) = principal(graph, item)? {
                out.push(p);
            }
        }
    }
    Ok(out)
}

pub fn user_ref(graph: &dyn LegacyGraph, obj: &LegacyObject, key: &str) -> Result<Option<LegacyUserRef>> {
    match obj.get(key) {
        Some(attr) => match principal(graph, attr)? {
            Some(LegacyPrincipal::User(u)) => Ok(Some(u)),
            _ => Ok(None),
        },
        None => Ok(None),
    }
}

// --- Access control ---

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyAccess {
    /// -1 public, 0 inheriting, 1 protected.
    pub protection: i64,
    pub allowed: Vec<LegacyPrincipal>,
    pub managers: Vec<LegacyPrincipal>,
    pub managers_email: Vec<String>,
    pub required_domains: Vec<String>,
    pub access_key: String,
    pub contact: String,
}

pub fn access(graph: &dyn LegacyGraph, owner: &LegacyObject) -> Result<LegacyAccess> {
    let Some(ac) = graph.follow(owner, "ac")? else {
        return Ok(LegacyAccess::default());
    };
    let mut required_domains = Vec::new();
    for oid in ac.refs("requiredDomains") {
        if let Some(domain) = load_opt(graph, oid)? {
            required_domains.push(domain.string("name"));
        }
    }
    Ok(LegacyAccess {
        protection: ac.int("_accessProtection").unwrap_or(0),
        allowed: principals(graph, &ac, "allowed")?,
        managers: principals(graph, &ac, "managers")?,
        managers_email: ac.strings("managersEmail"),
        required_domains,
        access_key: ac.string("accessKey"),
        contact: ac.string("contactInfo"),
    })
}

// --- Users and groups ---

#[derive(Clone, Debug, PartialEq)]
pub enum LegacyIdentity {
    Local {
        login: String,
        password: Option<String>,
        password_hash: Option<String>,
    },
    Ldap {
        login: String,
    },
    Unsupported {
        class: String,
        login: String,
    },
}

#[derive(Clone, Debug)]
pub struct LegacyAvatar {
    pub oid: Oid,
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub title: String,
    pub affiliation: String,
    pub phone: String,
    pub address: String,
    pub email: String,
    pub secondary_emails: Vec<String>,
    pub status: String,
    pub merge_to: Option<Oid>,
    pub merge_from: Vec<Oid>,
    pub identities: Vec<LegacyIdentity>,
    pub favorite_users: Vec<Oid>,
    pub favorite_categories: Vec<String>,
    pub has_links: bool,
    pub timezone: Option<String>,
    pub language: Option<String>,
}

impl LegacyAvatar {
    pub fn is_merged(&self) -> bool {
        self.merge_to.is_some()
    }

    pub fn has_names(&self) -> bool {
        !self.first_name.trim().is_empty() || !self.last_name.trim().is_empty()
    }
}

pub fn identity(obj: &LegacyObject) -> LegacyIdentity {
    let login = obj.string("login");
    match obj.class_name() {
        "LocalIdentity" => LegacyIdentity::Local {
            login,
            password: obj.str("password").filter(|p| !p.is_empty()).map(str::to_string),
            password_hash: obj.str("passwordHash").filter(|p| !p.is_empty()).map(str::to_string),
        },
        "LDAPIdentity" | "NiceIdentity" => LegacyIdentity::Ldap { login },
        other => LegacyIdentity::Unsupported {
            class: other.to_string(),
            login,
        },
    }
}

pub fn avatar(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyAvatar> {
    if obj.class_name() != "Avatar" {
        return Err(MigrateError::LegacyData(format!(
            "{} is a {}, not an Avatar",
            obj.oid,
            obj.class.dotted()
        )));
    }
    let mut identities = Vec::new();
    for oid in obj.refs("identities") {
        if let Some(ident) = load_opt(graph, oid)? {
            identities.push(identity(&ident));
        }
    }
    let mut favorite_categories = Vec::new();
    for oid in obj.refs("favoriteCategories") {
        if let Some(cat) = load_opt(graph, oid)? {
            favorite_categories.push(id_of(&cat));
        }
    }
    Ok(LegacyAvatar {
        oid: obj.oid,
        id: id_of(obj),
        first_name: obj.string("name"),
        last_name: obj.string("surName"),
        title: obj.string("title"),
        affiliation: obj.first_string("organisation"),
        phone: obj.first_string("telephone"),
        address: obj.first_string("address"),
        email: obj.string("email"),
        secondary_emails: obj.strings("secondaryEmails"),
        status: obj.str("status").unwrap_or("activated").to_string(),
        merge_to: obj.reference("_mergeTo"),
        merge_from: obj.refs("_mergeFrom"),
        identities,
        favorite_users: obj.refs("favoriteUsers"),
        favorite_categories,
        has_links: obj.get("linkedTo").is_some_and(|a| !a.items().is_empty()),
        timezone: obj.str("timezone").map(str::to_string),
        language: obj.str("lang").map(str::to_string),
    })
}

#[derive(Clone, Debug)]
pub struct LegacyGroup {
    pub id: String,
    pub name: String,
    pub members: Vec<LegacyPrincipal>,
}

/// Local groups only; directory-backed groups in the same collection are `None`.
pub fn group(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<Option<LegacyGroup>> {
    if obj.class_name() != "Group" || obj.class.broken {
        return Ok(None);
    }
    Ok(Some(LegacyGroup {
        id: id_of(obj),
        name: obj.string("name"),
        members: principals(graph, obj, "members")?,
    }))
}

// --- Global settings ---

#[derive(Clone, Debug, Default)]
pub struct LegacyInfo {
    pub title: String,
    pub organisation: String,
    pub timezone: String,
    pub language: String,
    pub full_access_networks: Vec<String>,
    pub admins: Vec<LegacyPrincipal>,
}

pub fn info(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyInfo> {
    Ok(LegacyInfo {
        title: obj.string("_title"),
        organisation: obj.string("_organisation"),
        timezone: obj.str("_timezone").unwrap_or("UTC").to_string(),
        language: obj.str("_lang").unwrap_or("en_GB").to_string(),
        full_access_networks: obj.strings("_ip_based_acl"),
        admins: principals(graph, obj, "_adminList")?,
    })
}

#[derive(Clone, Debug)]
pub struct LegacyDomain {
    pub name: String,
    pub description: String,
    pub masks: Vec<String>,
}

pub fn domain(obj: &LegacyObject) -> LegacyDomain {
    LegacyDomain {
        name: obj.string("name"),
        description: obj.string("description"),
        masks: obj.strings("filterList"),
    }
}

#[derive(Clone, Debug)]
pub enum UpcomingEntry {
    Category { id: String, weight: f64, days: i64 },
    Event { id: String, weight: f64, days: i64 },
}

pub fn upcoming_entries(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<Vec<UpcomingEntry>> {
    let mut out = Vec::new();
    for oid in obj.refs("_objects") {
        let Some(entry) = load_opt(graph, oid)? else {
            continue;
        };
        let weight = match entry.get("weight") {
            Some(Attr::Float(f)) => *f,
            Some(other) => other.as_int().unwrap_or(0) as f64,
            None => 0.0,
        };
        let days = entry.int("advertisingDelta").unwrap_or(0);
        let Some(target) = graph.follow(&entry, "obj")? else {
            continue;
        };
        match target.class_name() {
            "Category" => out.push(UpcomingEntry::Category { id: id_of(&target), weight, days }),
            "Conference" => out.push(UpcomingEntry::Event { id: id_of(&target), weight, days }),
            _ => {}
        }
    }
    Ok(out)
}

// --- Rooms ---

#[derive(Clone, Debug)]
pub struct LegacyLocation {
    pub name: String,
    pub is_default: bool,
}

pub fn location(obj: &LegacyObject) -> LegacyLocation {
    LegacyLocation {
        name: obj.str("friendlyName").map(str::to_string).unwrap_or_else(|| obj.string("name")),
        is_default: obj.flag("isDefault"),
    }
}

#[derive(Clone, Debug)]
pub struct LegacyRoom {
    pub id: i64,
    pub location_name: String,
    pub name: String,
    pub building: String,
    pub floor: String,
    pub number: String,
    pub responsible_id: Option<String>,
    pub capacity: Option<i64>,
    pub is_active: bool,
    pub is_reservable: bool,
}

pub fn room(obj: &LegacyObject) -> Result<LegacyRoom> {
    let id = obj
        .int("id")
        .ok_or_else(|| MigrateError::LegacyData(format!("room {} has no numeric id", obj.oid)))?;
    Ok(LegacyRoom {
        id,
        location_name: obj.string("locationName"),
        name: obj.string("name"),
        building: obj.key("building").unwrap_or_default(),
        floor: obj.key("floor").unwrap_or_default(),
        number: obj.key("roomNr").unwrap_or_default(),
        responsible_id: obj.key("responsibleId"),
        capacity: obj.int("capacity"),
        is_active: obj.get("isActive").and_then(Attr::as_bool).unwrap_or(true),
        is_reservable: obj.get("isReservable").and_then(Attr::as_bool).unwrap_or(true),
    })
}

#[derive(Clone, Debug)]
pub struct LegacyReservation {
    pub room_id: Option<i64>,
    pub start: Option<LegacyDateTime>,
    pub end: Option<LegacyDateTime>,
    pub booked_for_id: Option<String>,
    pub booked_for_name: String,
    pub created_by: Option<String>,
    pub reason: String,
    pub is_cancelled: bool,
    pub is_rejected: bool,
}

pub fn reservation(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyReservation> {
    let room_id = match graph.follow(obj, "room")? {
        Some(room) => room.int("id"),
        None => obj.int("roomId"),
    };
    Ok(LegacyReservation {
        room_id,
        start: datetime(obj, "startDT"),
        end: datetime(obj, "endDT"),
        booked_for_id: obj.key("bookedForId"),
        booked_for_name: obj.string("bookedForName"),
        created_by: obj.key("createdBy"),
        reason: obj.string("reason"),
        is_cancelled: obj.flag("isCancelled"),
        is_rejected: obj.flag("isRejected"),
    })
}

// --- Categories ---

#[derive(Clone, Debug)]
pub struct LegacyCategory {
    pub oid: Oid,
    pub id: String,
    pub name: String,
    pub description: String,
    pub visibility: Option<i64>,
    pub timezone: Option<String>,
    pub order: i64,
    pub subcategories: Vec<Oid>,
    pub access: LegacyAccess,
    pub creators: Vec<LegacyPrincipal>,
}

pub fn category(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyCategory> {
    if obj.class_name() != "Category" {
        return Err(MigrateError::LegacyData(format!(
            "{} is a {}, not a Category",
            obj.oid,
            obj.class.dotted()
        )));
    }
    Ok(LegacyCategory {
        oid: obj.oid,
        id: id_of(obj),
        name: obj.string("name"),
        description: obj.string("description"),
        visibility: obj.int("_visibility"),
        timezone: obj.str("_timezone").map(str::to_string),
        order: obj.int("_order").unwrap_or(0),
        subcategories: obj.refs("subcategories"),
        access: access(graph, obj)?,
        creators: principals(graph, obj, "_confCreators")?,
    })
}

// --- Events ---

#[derive(Clone, Debug)]
pub struct LegacyConference {
    pub oid: Oid,
    pub id: String,
    pub title: String,
    pub description: String,
    pub timezone: Option<String>,
    pub start: Option<LegacyDateTime>,
    pub end: Option<LegacyDateTime>,
    pub created: Option<LegacyDateTime>,
    pub closed: bool,
    pub owner_category_id: Option<String>,
    pub visibility: Option<i64>,
    pub keywords: Vec<String>,
    pub venue_name: String,
    pub room_name: String,
    pub address: String,
    pub short_url_tag: String,
    pub support_email: String,
    pub creator: Option<LegacyUserRef>,
    pub access: LegacyAccess,
    pub registrars: Vec<LegacyPrincipal>,
    pub submitters: Vec<LegacyPrincipal>,
    pub pending_submitters: Vec<String>,
    pub sessions: Vec<Oid>,
    pub contributions: Vec<Oid>,
    pub schedule: Vec<Oid>,
    pub materials: Vec<Oid>,
    pub minutes: Option<Oid>,
    pub log: Vec<Oid>,
}

pub fn conference(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyConference> {
    if obj.class_name() != "Conference" {
        return Err(MigrateError::LegacyData(format!(
            "{} is a {}, not a Conference",
            obj.oid,
            obj.class.dotted()
        )));
    }
    let owner_category_id = match obj.refs("owners").first() {
        Some(oid) => load_opt(graph, *oid)?.map(|cat| id_of(&cat)),
        None => None,
    };
    let (venue_name, address) = match obj.refs("places").first() {
        Some(oid) => match load_opt(graph, *oid)? {
            Some(place) => (place.string("name"), place.string("address")),
            None => (String::new(), String::new()),
        },
        None => (String::new(), String::new()),
    };
    let room_name = match obj.refs("rooms").first() {
        Some(oid) => load_opt(graph, *oid)?.map(|r| r.string("name")).unwrap_or_default(),
        None => String::new(),
    };
    let keywords = obj
        .string("_keywords")
        .lines()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    Ok(LegacyConference {
        oid: obj.oid,
        id: id_of(obj),
        title: obj.string("title"),
        description: obj.string("description"),
        timezone: obj.str("timezone").map(str::to_string),
        start: datetime(obj, "startDate"),
        end: datetime(obj, "endDate"),
        created: datetime(obj, "_creationDS"),
        closed: obj.flag("_closed"),
        owner_category_id,
        visibility: obj.int("_visibility"),
        keywords,
        venue_name,
        room_name,
        address,
        short_url_tag: obj.string("_sortUrlTag"),
        support_email: obj.string("_supportEmail"),
        creator: user_ref(graph, obj, "_creator")?,
        access: access(graph, obj)?,
        registrars: principals(graph, obj, "_registrars")?,
        submitters: principals(graph, obj, "_submitters")?,
        pending_submitters: obj.strings("_pendingSubmitters"),
        sessions: obj.refs("sessions"),
        contributions: obj.refs("contributions"),
        schedule: obj.refs("_schedule"),
        materials: obj.refs("materials"),
        minutes: obj.reference("minutes"),
        log: obj.refs("_log"),
    })
}

#[derive(Clone, Debug)]
pub struct LegacySession {
    pub oid: Oid,
    pub id: String,
    pub title: String,
    pub description: String,
    pub materials: Vec<Oid>,
    pub minutes: Option<Oid>,
}

pub fn session(obj: &LegacyObject) -> LegacySession {
    LegacySession {
        oid: obj.oid,
        id: id_of(obj),
        title: obj.string("title"),
        description: obj.string("description"),
        materials: obj.refs("materials"),
        minutes: obj.reference("minutes"),
    }
}

#[derive(Clone, Debug)]
pub struct LegacyContribution {
    pub oid: Oid,
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration_minutes: i64,
    pub session: Option<Oid>,
    pub withdrawn: bool,
    pub materials: Vec<Oid>,
    pub minutes: Option<Oid>,
}

pub fn contribution(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyContribution> {
    let withdrawn = match graph.follow(obj, "_status")? {
        Some(status) => status.class_name() == "ContribStatusWithdrawn",
        None => false,
    };
    Ok(LegacyContribution {
        oid: obj.oid,
        id: id_of(obj),
        title: obj.string("title"),
        description: obj.string("description"),
        duration_minutes: obj.int("duration").unwrap_or(0),
        session: obj.reference("_session"),
        withdrawn,
        materials: obj.refs("materials"),
        minutes: obj.reference("minutes"),
    })
}

#[derive(Clone, Debug)]
pub enum LegacyScheduleEntry {
    Break {
        title: String,
        start: Option<LegacyDateTime>,
        duration_minutes: i64,
    },
    Contribution {
        contribution: Oid,
        start: Option<LegacyDateTime>,
        duration_minutes: i64,
    },
    /// A session slot with its own nested schedule.
    Block {
        session: Option<Oid>,
        title: String,
        start: Option<LegacyDateTime>,
        duration_minutes: i64,
        children: Vec<Oid>,
    },
    Unknown(String),
}

pub fn schedule_entry(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyScheduleEntry> {
    let start = datetime(obj, "startDate");
    let duration_minutes = obj.int("duration").unwrap_or(0);
    Ok(match obj.class_name() {
        "BreakTimeSchEntry" => LegacyScheduleEntry::Break {
            title: obj.string("title"),
            start,
            duration_minutes,
        },
        "ContribSchEntry" => match obj.reference("_owner") {
            Some(contribution) => LegacyScheduleEntry::Contribution {
                contribution,
                start,
                duration_minutes,
            },
            None => LegacyScheduleEntry::Unknown("contribution entry without owner".into()),
        },
        "LinkedTimeSchEntry" => match graph.follow(obj, "_owner")? {
            Some(slot) => LegacyScheduleEntry::Block {
                session: slot.reference("session"),
                title: slot.string("title"),
                start,
                duration_minutes,
                children: slot.refs("_schedule"),
            },
            None => LegacyScheduleEntry::Unknown("block entry without slot".into()),
        },
        other => LegacyScheduleEntry::Unknown(other.to_string()),
    })
}

// --- Materials ---

#[derive(Clone, Debug)]
pub enum LegacyResource {
    Link {
        title: String,
        description: String,
        url: String,
    },
    File {
        title: String,
        description: String,
        file_name: String,
        archived_path: Option<String>,
    },
    Unsupported(String),
}

#[derive(Clone, Debug)]
pub struct LegacyMaterial {
    pub id: String,
    pub title: String,
    pub description: String,
    pub protection: i64,
    pub resources: Vec<LegacyResource>,
}

pub fn material(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyMaterial> {
    let mut resources = Vec::new();
    for oid in obj.refs("_resources") {
        let Some(res) = load_opt(graph, oid)? else {
            continue;
        };
        let title = res.string("name");
        let description = res.string("description");
        resources.push(match res.class_name() {
            "Link" => LegacyResource::Link {
                title,
                description,
                url: res.string("url"),
            },
            "LocalFile" => LegacyResource::File {
                title,
                description,
                file_name: res.string("fileName"),
                archived_path: res.str("_archivedId").map(str::to_string),
            },
            other => LegacyResource::Unsupported(other.to_string()),
        });
    }
    Ok(LegacyMaterial {
        id: id_of(obj),
        title: obj.string("title"),
        description: obj.string("description"),
        protection: access(graph, obj)?.protection,
        resources,
    })
}

// --- Logs ---

#[derive(Clone, Debug)]
pub struct LegacyLogItem {
    pub is_email: bool,
    pub logged: Option<LegacyDateTime>,
    pub module: String,
    pub subject: String,
    pub responsible: Option<LegacyUserRef>,
    pub info: serde_json::Value,
}

fn attr_to_json(attr: &Attr) -> serde_json::Value {
    match attr {
        Attr::Null => serde_json::Value::Null,
        Attr::Bool(b) => serde_json::json!(b),
        Attr::Int(i) => serde_json::json!(i),
        Attr::Float(f) => serde_json::json!(f),
        Attr::Str(s) => serde_json::json!(s),
        Attr::List(items) => serde_json::Value::Array(items.iter().map(attr_to_json).collect()),
        Attr::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), attr_to_json(v))).collect(),
        ),
        Attr::Ref(oid) => serde_json::json!(oid.to_string()),
    }
}

pub fn log_item(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyLogItem> {
    let info = obj.get("_logInfo").map(attr_to_json).unwrap_or_else(|| serde_json::json!({}));
    let subject = info
        .get("subject")
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(LegacyLogItem {
        is_email: obj.class_name() == "EmailLogItem",
        logged: datetime(obj, "_logDate"),
        module: obj.string("_module"),
        subject,
        responsible: user_ref(graph, obj, "_responsibleUser")?,
        info,
    })
}

// --- Root entries and identifiers ---

/// Object stored under a root entry, either directly or as the `main` entry
/// of a holder mapping.
pub fn root_object(graph: &dyn LegacyGraph, name: &str) -> Result<Option<Rc<LegacyObject>>> {
    let oid = match graph.root_entry(name) {
        Some(Attr::Ref(oid)) => oid,
        Some(Attr::Map(map)) => match map.get("main").and_then(Attr::as_ref_oid) {
            Some(oid) => oid,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    load_opt(graph, oid)
}

/// Integer counter kept under the `counters` root entry.
pub fn counter(graph: &dyn LegacyGraph, name: &str) -> Result<i64> {
    let holder = match graph.root_entry("counters") {
        Some(Attr::Map(map)) => map.get(name).cloned(),
        Some(Attr::Ref(oid)) => load_opt(graph, oid)?.and_then(|obj| obj.get(name).cloned()),
        _ => None,
    };
    Ok(match holder {
        Some(Attr::Int(i)) => i,
        Some(Attr::Ref(oid)) => load_opt(graph, oid)?
            .and_then(|c| c.int("_Counter__count").or_else(|| c.int("count")))
            .unwrap_or(0),
        _ => 0,
    })
}

/// Ids that are not plain canonical integers (`a123`, `007`) cannot be
/// reused as primary keys.
pub fn is_legacy_id(id: &str) -> bool {
    match id.parse::<i64>() {
        Ok(n) => n.to_string() != id,
        Err(_) => true,
    }
}

static WEBFACTORY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^MaKaC\.webinterface\.(\w+)(?:\.WebFactory)?$").unwrap());

/// Web-factory registry: legacy event id to factory id (`simple_event`,
/// `meeting`, ...). Events without an entry are conferences.
pub fn webfactory_registry(graph: &dyn LegacyGraph) -> Result<Vec<(String, Option<String>)>> {
    let Some(entry) = graph.root_entry("webfactoryregistry") else {
        return Ok(Vec::new());
    };
    let map = match entry {
        Attr::Map(map) => map,
        Attr::Ref(oid) => match load_opt(graph, oid)? {
            Some(obj) => match obj.get("data") {
                Some(Attr::Map(map)) => map.clone(),
                _ => obj.state.clone(),
            },
            None => return Ok(Vec::new()),
        },
        _ => return Ok(Vec::new()),
    };
    let mut out = Vec::with_capacity(map.len());
    for (event_id, value) in map {
        let wf = match value.as_ref_oid() {
            Some(oid) => load_opt(graph, oid)?.map(|wf| {
                let dotted = wf.class.dotted();
                WEBFACTORY_NAME
                    .captures(&dotted)
                    .map(|c| c[1].to_string())
                    .unwrap_or(dotted)
            }),
            None => None,
        };
        out.push((event_id, wf));
    }
    Ok(out)
}

#[derive(Clone, Debug)]
pub struct LegacyUpcoming {
    pub max_entries: i64,
    pub entries: Vec<UpcomingEntry>,
}

pub fn upcoming(graph: &dyn LegacyGraph, obj: &LegacyObject) -> Result<LegacyUpcoming> {
    Ok(LegacyUpcoming {
        max_entries: obj.int("_maxEvents").unwrap_or(10),
        entries: upcoming_entries(graph, obj)?,
    })
}
