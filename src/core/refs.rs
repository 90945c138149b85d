//! Reference types shared by namespaces, the codec and the migrators.
//!
//! An [`EntityRef`] points at a row in the destination store, a [`LegacyRef`]
//! at an object in the source graph. Both are plain values so they can be
//! used as map keys and serialized into restore points.

use crate::core::graph::Oid;
use std::fmt;
use std::str::FromStr;

/// Destination entity types that mapping tables may point at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    User,
    Group,
    IpNetworkGroup,
    Location,
    Room,
    Category,
    Event,
    Session,
    Contribution,
    AttachmentFolder,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::User,
        EntityKind::Group,
        EntityKind::IpNetworkGroup,
        EntityKind::Location,
        EntityKind::Room,
        EntityKind::Category,
        EntityKind::Event,
        EntityKind::Session,
        EntityKind::Contribution,
        EntityKind::AttachmentFolder,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Group => "Group",
            EntityKind::IpNetworkGroup => "IPNetworkGroup",
            EntityKind::Location => "Location",
            EntityKind::Room => "Room",
            EntityKind::Category => "Category",
            EntityKind::Event => "Event",
            EntityKind::Session => "Session",
            EntityKind::Contribution => "Contribution",
            EntityKind::AttachmentFolder => "AttachmentFolder",
        }
    }

    /// Destination table holding rows of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Group => "groups",
            EntityKind::IpNetworkGroup => "ip_network_groups",
            EntityKind::Location => "locations",
            EntityKind::Room => "rooms",
            EntityKind::Category => "categories",
            EntityKind::Event => "events",
            EntityKind::Session => "sessions",
            EntityKind::Contribution => "contributions",
            EntityKind::AttachmentFolder => "attachment_folders",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown entity type '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn user(id: i64) -> Self {
        Self::new(EntityKind::User, id)
    }

    pub fn group(id: i64) -> Self {
        Self::new(EntityKind::Group, id)
    }

    pub fn category(id: i64) -> Self {
        Self::new(EntityKind::Category, id)
    }

    pub fn event(id: i64) -> Self {
        Self::new(EntityKind::Event, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.kind, self.id)
    }
}

/// Coarse type tag of a legacy object, derived from its class name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LegacyKind {
    User,
    Group,
    ExternalGroup,
    Category,
    Event,
    Session,
    Contribution,
    File,
    Other,
}

impl LegacyKind {
    pub fn from_class_name(name: &str) -> Self {
        match name {
            "Avatar" => LegacyKind::User,
            "Group" => LegacyKind::Group,
            "CERNGroup" | "LDAPGroup" | "NiceGroup" | "LDAPGroupWrapper" => {
                LegacyKind::ExternalGroup
            }
            "Category" => LegacyKind::Category,
            "Conference" => LegacyKind::Event,
            "Session" => LegacyKind::Session,
            "Contribution" | "AcceptedContribution" => LegacyKind::Contribution,
            "LocalFile" | "Link" => LegacyKind::File,
            _ => LegacyKind::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LegacyRef {
    pub oid: Oid,
    pub kind: LegacyKind,
}

impl fmt::Display for LegacyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.kind, self.oid)
    }
}
