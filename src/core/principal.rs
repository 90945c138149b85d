//! Resolution of legacy users, groups and emails into destination principals.

use crate::core::db::Destination;
use crate::core::decode::{LegacyPrincipal, LegacyUserRef};
use crate::core::error::{MigrateError, Result};
use crate::core::logger::MigrationLogger;
use crate::core::namespace::{NsHandle, NsValue, global};
use crate::core::text::{is_valid_mail, sanitize_email};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params};
use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Principal {
    User(i64),
    LocalGroup(i64),
    ExternalGroup { provider: String, name: String },
    /// Placeholder for someone who has no account yet.
    Email(String),
    Network(i64),
}

impl Principal {
    fn type_name(&self) -> &'static str {
        match self {
            Principal::User(_) => "user",
            Principal::LocalGroup(_) => "local_group",
            Principal::ExternalGroup { .. } => "external_group",
            Principal::Email(_) => "email",
            Principal::Network(_) => "network",
        }
    }
}

pub struct PrincipalResolver {
    global: NsHandle,
    default_group_provider: String,
    log: Rc<dyn MigrationLogger>,
}

impl PrincipalResolver {
    pub fn new(global: NsHandle, default_group_provider: &str, log: Rc<dyn MigrationLogger>) -> Self {
        Self {
            global,
            default_group_provider: default_group_provider.to_string(),
            log,
        }
    }

    /// Map a legacy user to a destination user id: by legacy id, then by the
    /// email recorded on the legacy object (primary, then secondary index).
    pub fn user(&self, user: &LegacyUserRef, context: &str) -> Result<Option<i64>> {
        let ns = self.global.borrow();
        if let Some(found) = ns.lookup_entity(global::AVATAR_MERGED_USER, &NsValue::from(user.id.as_str()))? {
            return Ok(Some(found.id));
        }
        let email = sanitize_email(&user.email);
        if !email.is_empty() {
            let key = NsValue::from(email.as_str());
            let by_email = match ns.lookup_entity(global::USERS_BY_PRIMARY_EMAIL, &key)? {
                Some(found) => Some(found),
                None => ns.lookup_entity(global::USERS_BY_SECONDARY_EMAIL, &key)?,
            };
            if let Some(found) = by_email {
                self.log.warning(&format!(
                    "Using {} for {} (matched via email) in {}",
                    found, user.id, context
                ));
                return Ok(Some(found.id));
            }
        }
        self.log.warning(&format!(
            "User {} doesn't exist (referenced from {})",
            user.id, context
        ));
        Ok(None)
    }

    pub fn resolve(&self, principal: &LegacyPrincipal, context: &str) -> Result<Option<Principal>> {
        match principal {
            LegacyPrincipal::User(user) => Ok(self.user(user, context)?.map(Principal::User)),
            LegacyPrincipal::Group(id) => {
                let found = self
                    .global
                    .borrow()
                    .lookup_entity(global::ALL_GROUPS, &NsValue::from(id.as_str()))?;
                match found {
                    Some(group) => Ok(Some(Principal::LocalGroup(group.id))),
                    None => Err(MigrateError::OrderingViolation(format!(
                        "group {} referenced from {} has not been migrated",
                        id, context
                    ))),
                }
            }
            LegacyPrincipal::ExternalGroup(name) => Ok(Some(Principal::ExternalGroup {
                provider: self.default_group_provider.clone(),
                name: name.clone(),
            })),
            LegacyPrincipal::Email(email) => self.email(email, context),
            LegacyPrincipal::Unsupported(what) => {
                self.log
                    .warning(&format!("Skipping {} in {}", principal.describe(), context));
                tracing::debug!(target: "conf_migrate", what = %what, "unsupported principal");
                Ok(None)
            }
        }
    }

    /// A bare email in an ACL: the matching user, or an email placeholder.
    pub fn email(&self, raw: &str, context: &str) -> Result<Option<Principal>> {
        let email = sanitize_email(raw);
        if !is_valid_mail(&email) {
            self.log
                .warning(&format!("Invalid email '{}' in {}", raw.trim(), context));
            return Ok(None);
        }
        let found = self
            .global
            .borrow()
            .lookup_entity(global::USERS_BY_EMAIL, &NsValue::from(email.as_str()))?;
        Ok(Some(match found {
            Some(user) => Principal::User(user.id),
            None => Principal::Email(email),
        }))
    }

    /// Resolve a list, dropping (and reporting) what cannot be resolved.
    pub fn resolve_all(&self, principals: &[LegacyPrincipal], context: &str) -> Result<Vec<Principal>> {
        let mut out = Vec::with_capacity(principals.len());
        for p in principals {
            if let Some(resolved) = self.resolve(p, context)? {
                out.push(resolved);
            }
        }
        Ok(out)
    }

    pub fn system_user(&self) -> Result<Option<i64>> {
        Ok(self
            .global
            .borrow()
            .slot(global::SYSTEM_USER)?
            .and_then(NsValue::as_entity)
            .map(|e| e.id))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Grant {
    pub read_access: bool,
    pub full_access: bool,
    pub roles: Vec<&'static str>,
}

impl Grant {
    pub fn read() -> Self {
        Self {
            read_access: true,
            ..Self::default()
        }
    }

    pub fn manage() -> Self {
        Self {
            full_access: true,
            ..Self::default()
        }
    }

    pub fn role(role: &'static str) -> Self {
        Self {
            roles: vec![role],
            ..Self::default()
        }
    }
}

/// Add `grant` for `principal` to an ACL table, merging with an existing entry.
pub fn grant(
    dest: &Destination,
    table: &str,
    owner_column: &str,
    owner_id: i64,
    principal: &Principal,
    grant: &Grant,
) -> Result<()> {
    let (key_sql, key): (&str, Value) = match principal {
        Principal::User(id) => ("user_id = ?3", Value::Integer(*id)),
        Principal::LocalGroup(id) => ("local_group_id = ?3", Value::Integer(*id)),
        Principal::ExternalGroup { provider, name } => (
            "mp_group_provider || ':' || mp_group_name = ?3",
            Value::Text(format!("{}:{}", provider, name)),
        ),
        Principal::Email(email) => ("email = ?3", Value::Text(email.clone())),
        Principal::Network(id) => ("ip_network_group_id = ?3", Value::Integer(*id)),
    };
    let lookup = format!(
        "SELECT id, read_access, full_access, roles FROM {table}
         WHERE {owner_column} = ?1 AND type = ?2 AND {key_sql}"
    );
    let existing: Option<(i64, bool, bool, String)> = dest
        .conn()
        .query_row(
            &lookup,
            params![owner_id, principal.type_name(), key],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;

    match existing {
        Some((id, read, full, roles)) => {
            let mut merged: BTreeSet<String> = roles
                .split(',')
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            merged.extend(grant.roles.iter().map(|r| r.to_string()));
            dest.execute(
                &format!("UPDATE {table} SET read_access = ?1, full_access = ?2, roles = ?3 WHERE id = ?4"),
                params![
                    read || grant.read_access,
                    full || grant.full_access,
                    merged.into_iter().collect::<Vec<_>>().join(","),
                    id
                ],
            )?;
        }
        None => {
            let (user_id, group_id, provider, name, email, network) = match principal {
                Principal::User(id) => (Some(*id), None, None, None, None, None),
                Principal::LocalGroup(id) => (None, Some(*id), None, None, None, None),
                Principal::ExternalGroup { provider, name } => {
                    (None, None, Some(provider.clone()), Some(name.clone()), None, None)
                }
                Principal::Email(email) => (None, None, None, None, Some(email.clone()), None),
                Principal::Network(id) => (None, None, None, None, None, Some(*id)),
            };
            let roles: BTreeSet<&str> = grant.roles.iter().copied().collect();
            dest.execute(
                &format!(
                    "INSERT INTO {table} ({owner_column}, type, user_id, local_group_id, mp_group_provider,
                     mp_group_name, email, ip_network_group_id, read_access, full_access, roles)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    owner_id,
                    principal.type_name(),
                    user_id,
                    group_id,
                    provider,
                    name,
                    email,
                    network,
                    grant.read_access,
                    grant.full_access,
                    roles.into_iter().collect::<Vec<_>>().join(",")
                ],
            )?;
        }
    }
    Ok(())
}
