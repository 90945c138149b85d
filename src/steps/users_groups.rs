//! Users, their identities and emails, local groups and the system user.
//!
//! Email addresses must be unique across users. Legacy data is not, so
//! collisions are settled here, deterministically, in collection order:
//!
//! * Two users with the same primary email: if exactly one of them has
//!   login identities it is kept and the other is marked deleted, otherwise
//!   both are marked deleted.
//! * A primary email that another user holds as a secondary email is taken
//!   away from that other user.
//! * A secondary email already used anywhere else is dropped.

use crate::core::decode::{self, LegacyAvatar, LegacyIdentity, LegacyPrincipal};
use crate::core::error::{MigrateError, Result};
use crate::core::graph::{LegacyGraph, Oid};
use crate::core::migration::{Migrator, Outcome, StepContext, WholeGraph};
use crate::core::namespace::{NsValue, global};
use crate::core::refs::EntityRef;
use crate::core::text::{is_valid_mail, sanitize_email, sanitize_user_input};
use crate::steps::{each_object, server_info};
use rusqlite::params;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

const LOCAL_PROVIDER: &str = "indico";

pub struct UsersGroups {
    ctx: StepContext,
    /// Avatar oid to destination user id.
    migrated: FxHashMap<Oid, i64>,
    /// Merge targets not migrated yet, with the legacy ids waiting on them.
    pending_merges: FxHashMap<Oid, Vec<String>>,
    identities: FxHashSet<(String, String)>,
    favorite_users: Vec<(i64, Vec<Oid>)>,
}

pub fn build(ctx: &StepContext) -> Result<Box<dyn Migrator<WholeGraph>>> {
    Ok(Box::new(UsersGroups {
        ctx: ctx.clone(),
        migrated: FxHashMap::default(),
        pending_merges: FxHashMap::default(),
        identities: FxHashSet::default(),
        favorite_users: Vec::new(),
    }))
}

fn user_key(id: i64) -> NsValue {
    NsValue::Entity(EntityRef::user(id))
}

impl UsersGroups {
    fn migrate_users(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let graph = ctx.graph.as_ref();
        each_object(&ctx, graph, "Users", graph.collection("avatars")?, |obj| {
            let avatar = match decode::avatar(graph, &obj) {
                Ok(avatar) => avatar,
                Err(MigrateError::LegacyData(msg)) => {
                    ctx.log.warning(&format!("Skipping user entry: {}", msg));
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.migrate_avatar(graph, &avatar)
        })?;
        for (target, waiting) in self.pending_merges.drain() {
            self.ctx.log.warning(&format!(
                "Merge target {} of users {} was never migrated",
                target,
                waiting.join(", ")
            ));
        }
        Ok(())
    }

    fn migrate_avatar(&mut self, graph: &dyn LegacyGraph, avatar: &LegacyAvatar) -> Result<()> {
        let log = Rc::clone(&self.ctx.log);
        if let Some(first) = avatar.merge_to {
            let target = final_merge_target(graph, first)?;
            match self.migrated.get(&target) {
                Some(&uid) => self.map_legacy_id(&avatar.id, uid)?,
                None => self.pending_merges.entry(target).or_default().push(avatar.id.clone()),
            }
            log.log(&format!("Skipping merged user {}", avatar.id));
            return Ok(());
        }
        if avatar.status == "Not confirmed" {
            log.info(&format!("Skipping unconfirmed user {}", avatar.id));
            return Ok(());
        }
        if !avatar.has_names() && avatar.identities.is_empty() && !avatar.has_links {
            log.info(&format!("Skipping user {} with no names, identities or links", avatar.id));
            return Ok(());
        }

        let id = match avatar.id.parse::<i64>() {
            Ok(id) if !self.ctx.dest.row_exists("users", id)? => id,
            _ => {
                let id = self.ctx.dest.next_id("users")?;
                log.warning(&format!("User {} gets new id {}", avatar.id, id));
                id
            }
        };
        let email = sanitize_email(&avatar.email);
        let mut is_deleted = false;
        if !is_valid_mail(&email) {
            log.warning(&format!(
                "User {} has invalid primary email '{}'; marking deleted",
                avatar.id, email
            ));
            is_deleted = true;
        }
        let secondaries: BTreeSet<String> = avatar
            .secondary_emails
            .iter()
            .map(|e| sanitize_email(e))
            .filter(|e| is_valid_mail(e) && *e != email)
            .collect();

        self.ctx.dest.execute(
            "INSERT INTO users (id, first_name, last_name, title, affiliation, phone, address, email,
             timezone, language, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                name_or_unknown(&avatar.first_name),
                name_or_unknown(&avatar.last_name),
                sanitize_user_input(&avatar.title),
                sanitize_user_input(&avatar.affiliation),
                avatar.phone.trim(),
                avatar.address.trim(),
                email,
                avatar.timezone,
                avatar.language,
                is_deleted
            ],
        )?;
        self.migrate_identities(id, avatar)?;
        let secondaries = fix_collisions(&self.ctx, id, &email, is_deleted, secondaries)?;
        for secondary in &secondaries {
            self.ctx.dest.execute(
                "INSERT INTO user_secondary_emails (user_id, email) VALUES (?1, ?2)",
                params![id, secondary],
            )?;
        }

        {
            let mut ns = self.ctx.global.borrow_mut();
            for cat in &avatar.favorite_categories {
                ns.setmap_entry(global::USER_FAVORITE_CATEGORIES, NsValue::from(cat.as_str()))?
                    .insert(user_key(id));
            }
        }
        if !avatar.favorite_users.is_empty() {
            self.favorite_users.push((id, avatar.favorite_users.clone()));
        }

        self.migrated.insert(avatar.oid, id);
        self.ctx.dest.execute(
            "INSERT OR IGNORE INTO favorite_users (user_id, target_id) VALUES (?1, ?1)",
            [id],
        )?;
        self.map_legacy_id(&avatar.id, id)?;
        for oid in &avatar.merge_from {
            if let Ok(merged) = graph.load(*oid) {
                if let Some(old_id) = merged.key("id") {
                    self.map_legacy_id(&old_id, id)?;
                }
            }
        }
        if let Some(waiting) = self.pending_merges.remove(&avatar.oid) {
            for old_id in waiting {
                self.map_legacy_id(&old_id, id)?;
            }
        }
        log.log(&format!("User {} -> {}", avatar.id, id));
        Ok(())
    }

    fn map_legacy_id(&self, legacy_id: &str, user_id: i64) -> Result<()> {
        self.ctx.global.borrow_mut().insert(
            global::AVATAR_MERGED_USER,
            NsValue::from(legacy_id),
            EntityRef::user(user_id),
        )
    }

    fn migrate_identities(&mut self, user_id: i64, avatar: &LegacyAvatar) -> Result<()> {
        let log = &self.ctx.log;
        for identity in &avatar.identities {
            let (provider, login, password, password_hash) = match identity {
                LegacyIdentity::Local {
                    login,
                    password,
                    password_hash,
                } => {
                    if self.ctx.config.ignore_local_accounts {
                        continue;
                    }
                    if password.is_none() && password_hash.is_none() {
                        log.warning(&format!(
                            "Skipping local identity '{}' of user {}: empty password",
                            login, avatar.id
                        ));
                        continue;
                    }
                    (LOCAL_PROVIDER.to_string(), login, password.clone(), password_hash.clone())
                }
                LegacyIdentity::Ldap { login } => {
                    (self.ctx.config.ldap_provider_name.clone(), login, None, None)
                }
                LegacyIdentity::Unsupported { class, login } => {
                    log.error(&format!(
                        "Unsupported provider {} for identity '{}' of user {}",
                        class, login, avatar.id
                    ));
                    continue;
                }
            };
            let login = login.trim().to_lowercase();
            if login.is_empty() {
                log.warning(&format!("User {} has an identity with an empty username", avatar.id));
                continue;
            }
            if !self.identities.insert((provider.clone(), login.clone())) {
                log.error(&format!(
                    "Duplicate identity {}:{} (user {})",
                    provider, login, avatar.id
                ));
                continue;
            }
            self.ctx.dest.execute(
                "INSERT INTO identities (user_id, provider, identifier, password, password_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, provider, login, password, password_hash],
            )?;
        }
        Ok(())
    }

    fn migrate_favorite_users(&mut self) -> Result<()> {
        let graph = self.ctx.graph.as_ref();
        for (user_id, favorites) in std::mem::take(&mut self.favorite_users) {
            for oid in favorites {
                let target = match self.migrated.get(&oid) {
                    Some(&id) => Some(id),
                    None => match graph.load(oid) {
                        Ok(obj) => match obj.key("id") {
                            Some(legacy) => crate::steps::user_by_legacy_id(&self.ctx, &legacy)?,
                            None => None,
                        },
                        Err(MigrateError::MissingObject(_)) => None,
                        Err(e) => return Err(e),
                    },
                };
                match target {
                    Some(target) => {
                        self.ctx.dest.execute(
                            "INSERT OR IGNORE INTO favorite_users (user_id, target_id) VALUES (?1, ?2)",
                            params![user_id, target],
                        )?;
                    }
                    None => self
                        .ctx
                        .log
                        .warning(&format!("User not found: favorite {} of user {}", oid, user_id)),
                }
            }
        }
        Ok(())
    }

    fn migrate_admins(&self) -> Result<()> {
        let info = server_info(self.ctx.graph.as_ref())?;
        for admin in &info.admins {
            let LegacyPrincipal::User(user) = admin else {
                self.ctx
                    .log
                    .warning(&format!("Skipping admin {}", admin.describe()));
                continue;
            };
            if let Some(id) = self.ctx.principals.user(user, "server admins")? {
                let updated = self.ctx.dest.execute(
                    "UPDATE users SET is_admin = 1 WHERE id = ?1 AND is_deleted = 0",
                    [id],
                )?;
                if updated > 0 {
                    self.ctx.log.info(&format!("Admin: {}", id));
                } else {
                    self.ctx
                        .log
                        .warning(&format!("Skipping admin {}: user is deleted", id));
                }
            }
        }
        Ok(())
    }

    fn migrate_groups(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let graph = ctx.graph.as_ref();
        let mut names: BTreeSet<String> = BTreeSet::new();
        each_object(&ctx, graph, "Groups", graph.collection("groups")?, |obj| {
            let Some(group) = decode::group(graph, &obj)? else {
                ctx.log
                    .log(&format!("Skipping non-local group {}", obj.class.dotted()));
                return Ok(());
            };
            let Ok(id) = group.id.parse::<i64>() else {
                ctx.log
                    .warning(&format!("Skipping group with non-numeric id '{}'", group.id));
                return Ok(());
            };
            let base = sanitize_user_input(&group.name);
            let mut name = base.clone();
            let mut n = 0;
            while !names.insert(name.to_lowercase()) {
                name = format!("{}-{}", base, n);
                n += 1;
            }
            if name != base {
                ctx.log
                    .warning(&format!("Duplicate group name '{}' renamed to '{}'", base, name));
            }
            ctx.dest.execute(
                "INSERT INTO groups (id, name) VALUES (?1, ?2)",
                params![id, name],
            )?;
            let context = format!("group {}", group.id);
            for member in &group.members {
                match member {
                    LegacyPrincipal::User(user) => {
                        if let Some(uid) = ctx.principals.user(user, &context)? {
                            ctx.dest.execute(
                                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                                params![id, uid],
                            )?;
                        }
                    }
                    other => ctx.log.warning(&format!(
                        "Unsupported group member type: {} in {}",
                        other.describe(),
                        context
                    )),
                }
            }
            ctx.global.borrow_mut().insert(
                global::ALL_GROUPS,
                NsValue::from(group.id.as_str()),
                EntityRef::group(id),
            )?;
            Ok(())
        })
    }

    fn migrate_system_user(&self) -> Result<()> {
        let dest = &self.ctx.dest;
        let id = match self.ctx.config.system_user_id {
            Some(id) => {
                let usable = dest.count(
                    "SELECT COUNT(*) FROM users WHERE id = ?1 AND is_deleted = 0",
                    [id],
                )? > 0;
                if !usable {
                    return Err(MigrateError::Usage(format!("Invalid system_user user id {}", id)));
                }
                dest.execute("UPDATE users SET is_system = 1 WHERE id = ?1", [id])?;
                id
            }
            None => {
                let id = if dest.row_exists("users", 0)? {
                    dest.next_id("users")?
                } else {
                    0
                };
                dest.execute(
                    "INSERT INTO users (id, first_name, last_name, email, is_system)
                     VALUES (?1, 'Indico', 'System', ?2, 1)",
                    params![id, self.ctx.config.default_email],
                )?;
                id
            }
        };
        self.ctx
            .global
            .borrow_mut()
            .put_slot(global::SYSTEM_USER, Some(user_key(id)))?;
        self.ctx.log.success(&format!("System user: {}", id));
        Ok(())
    }

    fn build_email_index(&self) -> Result<()> {
        let mut ns = self.ctx.global.borrow_mut();
        let mut all: BTreeMap<NsValue, NsValue> = ns.map(global::USERS_BY_PRIMARY_EMAIL)?.clone();
        all.extend(ns.map(global::USERS_BY_SECONDARY_EMAIL)?.clone());
        *ns.map_mut(global::USERS_BY_EMAIL)? = all;
        Ok(())
    }
}

impl Migrator<WholeGraph> for UsersGroups {
    fn name(&self) -> &'static str {
        "users"
    }

    fn run(&mut self, _unit: &mut WholeGraph) -> Result<Outcome> {
        self.migrate_users()?;
        self.migrate_favorite_users()?;
        self.migrate_admins()?;
        self.migrate_groups()?;
        self.ctx.dest.fix_sequences(&["users", "groups"])?;
        self.migrate_system_user()?;
        self.build_email_index()?;
        let removed = self.ctx.dest.execute(
            "DELETE FROM identities WHERE user_id IN (SELECT id FROM users WHERE is_deleted = 1)",
            [],
        )?;
        if removed > 0 {
            self.ctx
                .log
                .info(&format!("Removed {} identities of deleted users", removed));
        }
        Ok(Outcome::Done)
    }

    fn finish(&mut self) -> Result<()> {
        self.ctx.dest.fix_sequences(&["users", "groups"])
    }
}

fn name_or_unknown(raw: &str) -> String {
    let name = sanitize_user_input(raw);
    if name.is_empty() {
        "UNKNOWN".to_string()
    } else {
        name
    }
}

/// Follow a chain of merges to the avatar that absorbed it.
fn final_merge_target(graph: &dyn LegacyGraph, first: Oid) -> Result<Oid> {
    let mut seen = FxHashSet::default();
    let mut current = first;
    while seen.insert(current) {
        let next = match graph.load(current) {
            Ok(obj) => obj.reference("_mergeTo"),
            Err(MigrateError::MissingObject(_)) => None,
            Err(e) => return Err(e),
        };
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(current)
}

fn has_identities(ctx: &StepContext, user_id: i64) -> Result<bool> {
    Ok(ctx
        .dest
        .count("SELECT COUNT(*) FROM identities WHERE user_id = ?1", [user_id])?
        > 0)
}

fn mark_deleted(ctx: &StepContext, user_id: i64) -> Result<()> {
    ctx.dest
        .execute("UPDATE users SET is_deleted = 1 WHERE id = ?1", [user_id])?;
    Ok(())
}

/// Settle email collisions for a freshly inserted user and record its
/// emails in the indexes. Returns the secondary emails the user keeps.
pub(crate) fn fix_collisions(
    ctx: &StepContext,
    user_id: i64,
    email: &str,
    mut is_deleted: bool,
    secondaries: BTreeSet<String>,
) -> Result<BTreeSet<String>> {
    let log = &ctx.log;
    let key = NsValue::from(email);

    if !is_deleted {
        let holder = ctx
            .global
            .borrow()
            .lookup_entity(global::USERS_BY_PRIMARY_EMAIL, &key)?;
        if let Some(other) = holder {
            let mine = has_identities(ctx, user_id)?;
            let theirs = has_identities(ctx, other.id)?;
            if mine != theirs {
                let loser = if theirs { user_id } else { other.id };
                mark_deleted(ctx, loser)?;
                is_deleted = loser == user_id;
                log.warning(&format!(
                    "Primary email collision on {} between {} and {}; deleted {}",
                    email, other.id, user_id, loser
                ));
            } else {
                mark_deleted(ctx, user_id)?;
                mark_deleted(ctx, other.id)?;
                ctx.global
                    .borrow_mut()
                    .map_mut(global::USERS_BY_PRIMARY_EMAIL)?
                    .remove(&key);
                is_deleted = true;
                log.warning(&format!(
                    "Primary email collision on {} between {} and {}; deleted both",
                    email, other.id, user_id
                ));
            }
        }
    }
    if !is_deleted {
        ctx.global
            .borrow_mut()
            .insert(global::USERS_BY_PRIMARY_EMAIL, key.clone(), EntityRef::user(user_id))?;
    }

    let secondary_holder = ctx
        .global
        .borrow()
        .lookup_entity(global::USERS_BY_SECONDARY_EMAIL, &key)?;
    if let Some(other) = secondary_holder {
        if other.id != user_id {
            ctx.dest.execute(
                "DELETE FROM user_secondary_emails WHERE user_id = ?1 AND email = ?2",
                params![other.id, email],
            )?;
            ctx.global
                .borrow_mut()
                .map_mut(global::USERS_BY_SECONDARY_EMAIL)?
                .remove(&key);
            log.warning(&format!(
                "Primary email {} of user {} removed from secondary emails of {}",
                email, user_id, other.id
            ));
        }
    }

    let mut kept = BTreeSet::new();
    for secondary in secondaries {
        let skey = NsValue::from(secondary.as_str());
        let ns = ctx.global.borrow();
        let taken = ns.lookup(global::USERS_BY_PRIMARY_EMAIL, &skey)?.is_some()
            || ns.lookup(global::USERS_BY_SECONDARY_EMAIL, &skey)?.is_some();
        drop(ns);
        if taken {
            log.warning(&format!(
                "Secondary email {} of user {} already in use; dropped",
                secondary, user_id
            ));
            continue;
        }
        if !is_deleted {
            ctx.global.borrow_mut().insert(
                global::USERS_BY_SECONDARY_EMAIL,
                skey,
                EntityRef::user(user_id),
            )?;
        }
        kept.insert(secondary);
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::Level;
    use crate::steps::testing::{harness, harness_with};
    use serde_json::json;

    fn dump() -> serde_json::Value {
        json!({
            "root": {
                "avatars": {
                    "1": {"$ref": "0x10"}, "2": {"$ref": "0x11"}, "3": {"$ref": "0x12"},
                    "4": {"$ref": "0x13"}, "5": {"$ref": "0x14"}
                },
                "groups": {"7": {"$ref": "0x20"}, "8": {"$ref": "0x21"}, "x": {"$ref": "0x22"}}
            },
            "objects": {
                "0x10": {"class": "MaKaC.user.Avatar", "state": {
                    "id": "1", "name": "Ada", "surName": "Lovelace", "email": "Ada@Example.org",
                    "secondaryEmails": ["ada@second.org", "bad"],
                    "identities": [{"$ref": "0x30"}], "favoriteUsers": [{"$ref": "0x12"}]
                }},
                "0x11": {"class": "MaKaC.user.Avatar", "state": {
                    "id": "2", "name": "Old", "surName": "Ada", "email": "old@example.org",
                    "_mergeTo": {"$ref": "0x10"}
                }},
                "0x12": {"class": "MaKaC.user.Avatar", "state": {
                    "id": "3", "name": "", "surName": "Hopper", "email": "grace@example.org"
                }},
                "0x13": {"class": "MaKaC.user.Avatar", "state": {
                    "id": "4", "name": "Pending", "email": "p@example.org", "status": "Not confirmed"
                }},
                "0x14": {"class": "MaKaC.user.Avatar", "state": {
                    "id": "5", "name": "Broken", "email": "nope"
                }},
                "0x30": {"class": "MaKaC.authentication.LocalAuthentication.LocalIdentity", "state": {
                    "login": " ADA ", "password": "secret"
                }},
                "0x20": {"class": "MaKaC.user.Group", "state": {
                    "id": "7", "name": "Admins", "members": [{"$ref": "0x10"}, {"$ref": "0x40"}]
                }},
                "0x21": {"class": "MaKaC.user.Group", "state": {"id": "8", "name": "admins"}},
                "0x22": {"class": "MaKaC.user.Group", "state": {"id": "x", "name": "Odd"}},
                "0x40": {"class": "MaKaC.user.CERNGroup", "state": {"id": "it-dep"}}
            }
        })
    }

    #[test]
    fn users_groups_and_system_user() {
        let h = harness(dump());
        h.run("users").unwrap();

        assert_eq!(h.count("SELECT COUNT(*) FROM users WHERE is_system = 0"), 3);
        assert_eq!(h.count("SELECT COUNT(*) FROM users WHERE id = 0 AND is_system = 1"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM users WHERE id = 3 AND first_name = 'UNKNOWN'"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM users WHERE id = 5 AND is_deleted = 1"), 1);
        assert_eq!(
            h.count("SELECT COUNT(*) FROM identities WHERE identifier = 'ada' AND provider = 'indico'"),
            1
        );
        assert_eq!(h.count("SELECT COUNT(*) FROM user_secondary_emails"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM favorite_users WHERE user_id = 1 AND target_id = 3"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM favorite_users WHERE user_id = target_id"), 3);

        assert_eq!(h.count("SELECT COUNT(*) FROM groups"), 2);
        assert_eq!(h.count("SELECT COUNT(*) FROM groups WHERE name = 'admins-0'"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM group_members WHERE group_id = 7"), 1);
        assert!(h.log.contains(Level::Warning, "Unsupported group member type"));
        assert!(h.log.contains(Level::Warning, "non-numeric id 'x'"));

        let ns = h.ctx.global.borrow();
        let merged = ns
            .lookup_entity(global::AVATAR_MERGED_USER, &NsValue::from("2"))
            .unwrap();
        assert_eq!(merged, Some(EntityRef::user(1)));
        assert!(ns
            .lookup(global::USERS_BY_EMAIL, &NsValue::from("ada@second.org"))
            .unwrap()
            .is_some());
        assert!(ns
            .lookup(global::AVATAR_MERGED_USER, &NsValue::from("4"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn deleted_users_are_neither_admins_nor_found_by_email() {
        let mut data = dump();
        data["root"]["MaKaCInfo"] = json!({"$ref": "0x1"});
        data["root"]["avatars"]["6"] = json!({"$ref": "0x15"});
        data["root"]["avatars"]["7"] = json!({"$ref": "0x16"});
        data["objects"]["0x1"] = json!({"class": "MaKaC.common.info.MaKaCInfo", "state": {
            "_adminList": [{"$ref": "0x10"}, {"$ref": "0x14"}, {"$ref": "0x16"}]
        }});
        data["objects"]["0x15"] = json!({"class": "MaKaC.user.Avatar", "state": {
            "id": "6", "name": "Twin", "surName": "One", "email": "twins@example.org"
        }});
        data["objects"]["0x16"] = json!({"class": "MaKaC.user.Avatar", "state": {
            "id": "7", "name": "Twin", "surName": "Two", "email": "twins@example.org"
        }});
        let h = harness(data);
        h.run("users").unwrap();

        assert_eq!(h.count("SELECT COUNT(*) FROM users WHERE is_admin = 1"), 1);
        assert_eq!(h.count("SELECT COUNT(*) FROM users WHERE id = 1 AND is_admin = 1"), 1);
        assert!(h.log.contains(Level::Warning, "Skipping admin 5: user is deleted"));
        assert!(h.log.contains(Level::Warning, "Skipping admin 7: user is deleted"));

        let twins = NsValue::from("twins@example.org");
        let ns = h.ctx.global.borrow();
        assert!(ns.lookup(global::USERS_BY_PRIMARY_EMAIL, &twins).unwrap().is_none());
        assert!(ns.lookup(global::USERS_BY_EMAIL, &twins).unwrap().is_none());
    }

    #[test]
    fn local_accounts_can_be_ignored() {
        let h = harness_with(dump(), |c| c.ignore_local_accounts = true);
        h.run("users").unwrap();
        assert_eq!(h.count("SELECT COUNT(*) FROM identities"), 0);
    }

    #[test]
    fn configured_system_user_must_exist() {
        let h = harness_with(dump(), |c| c.system_user_id = Some(42));
        let err = h.run("users").unwrap_err();
        assert!(matches!(err, MigrateError::Usage(_)));
    }

    #[test]
    fn existing_user_can_be_the_system_user() {
        let h = harness_with(dump(), |c| c.system_user_id = Some(3));
        h.run("users").unwrap();
        assert_eq!(h.count("SELECT COUNT(*) FROM users WHERE is_system = 1"), 1);
        assert_eq!(h.ctx.principals.system_user().unwrap(), Some(3));
    }
}
