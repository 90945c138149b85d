//! Event protection, creator and the principal lists.

use super::{EventContext, EventMigrator};
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::principal::{self, Grant, Principal};
use crate::steps::categories::protection_mode;
use crate::steps::{grant_all, grant_domains, system_user};
use rusqlite::params;

pub const TABLE: &str = "event_principals";
const OWNER: &str = "event_id";
const NO_CONTACT: &str = "no contact info defined";

pub struct EventAcl {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(EventAcl { ctx: ctx.clone() })
}

impl EventAcl {
    fn creator(&self, ectx: &EventContext) -> Result<i64> {
        let context = format!("creator of event {}", ectx.legacy_id());
        let found = match &ectx.legacy.creator {
            Some(user) => self.ctx.principals.user(user, &context)?,
            None => None,
        };
        match found {
            Some(id) => Ok(id),
            None => {
                self.ctx
                    .log
                    .event_warning(ectx.legacy_id(), &format!("Event {} has no creator", ectx.legacy_id()));
                system_user(&self.ctx)
            }
        }
    }

    fn grant_emails(&self, event_id: i64, emails: &[String], grant: &Grant, context: &str) -> Result<()> {
        for raw in emails {
            if let Some(p) = self.ctx.principals.email(raw, context)? {
                principal::grant(&self.ctx.dest, TABLE, OWNER, event_id, &p, grant)?;
            }
        }
        Ok(())
    }
}

impl Migrator<EventContext> for EventAcl {
    fn name(&self) -> &'static str {
        "acl"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        let ctx = &self.ctx;
        let id = ectx.event_id;
        let access = &ectx.legacy.access;
        let context = format!("event {}", ectx.legacy_id());

        let creator = self.creator(ectx)?;
        principal::grant(&ctx.dest, TABLE, OWNER, id, &Principal::User(creator), &Grant::manage())?;

        let mut mode = protection_mode(access.protection, false);
        if mode == "public" && !access.required_domains.is_empty() {
            mode = "protected";
        }
        let contact = access.contact.trim();
        let contact = if contact.eq_ignore_ascii_case(NO_CONTACT) { "" } else { contact };
        ctx.dest.execute(
            "UPDATE events SET creator_id = ?1, protection_mode = ?2, access_key = ?3,
             no_access_contact = ?4 WHERE id = ?5",
            params![creator, mode, access.access_key.trim(), contact, id],
        )?;

        grant_domains(ctx, TABLE, OWNER, id, &access.required_domains, &context)?;
        grant_all(ctx, TABLE, OWNER, id, &access.allowed, &Grant::read(), &context)?;
        grant_all(ctx, TABLE, OWNER, id, &access.managers, &Grant::manage(), &context)?;
        self.grant_emails(id, &access.managers_email, &Grant::manage(), &context)?;
        grant_all(ctx, TABLE, OWNER, id, &ectx.legacy.registrars, &Grant::role("registration"), &context)?;
        grant_all(ctx, TABLE, OWNER, id, &ectx.legacy.submitters, &Grant::role("submit"), &context)?;
        self.grant_emails(id, &ectx.legacy.pending_submitters, &Grant::role("submit"), &context)?;
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{conference, site};
    use crate::core::logger::Level;
    use crate::steps::testing::harness;
    use serde_json::json;

    #[test]
    fn principals_merge_per_row() {
        let h = harness(site(
            &["0x100", "0x101"],
            json!({
                "0x100": conference("42", Some("0x11"), json!({
                    "ac": {"$ref": "0x110"},
                    "_submitters": [{"$ref": "0x3"}],
                    "_registrars": [{"$ref": "0x3"}],
                    "_pendingSubmitters": ["new@example.org", "not-an-email"]
                })),
                "0x110": {"class": "MaKaC.accessControl.AccessController", "state": {
                    "_accessProtection": 1,
                    "allowed": [{"$ref": "0x3"}, {"$ref": "0x4"}],
                    "managersEmail": ["GRACE@example.org"],
                    "accessKey": "secret",
                    "contactInfo": "No contact info defined"
                }},
                "0x4": {"class": "MaKaC.user.Avatar", "state": {"id": "77", "email": "gone@example.org"}},
                "0x101": conference("43", Some("0x11"), json!({"_creator": null}))
            }),
        ));
        h.run("users").unwrap();
        h.run("categories").unwrap();
        h.run("events").unwrap();

        assert_eq!(
            h.count("SELECT COUNT(*) FROM events WHERE id = 42 AND creator_id = 1 AND protection_mode = 'protected'
                     AND access_key = 'secret' AND no_access_contact = ''"),
            1
        );
        assert_eq!(
            h.count("SELECT COUNT(*) FROM event_principals WHERE event_id = 42 AND user_id = 2 AND read_access = 1
                     AND full_access = 1 AND roles = 'registration,submit'"),
            1
        );
        assert_eq!(h.count("SELECT COUNT(*) FROM event_principals WHERE event_id = 42 AND user_id = 2"), 1);
        assert_eq!(
            h.count("SELECT COUNT(*) FROM event_principals WHERE event_id = 42 AND type = 'email' AND email = 'new@example.org' AND roles = 'submit'"),
            1
        );
        assert!(h.log.contains(Level::Warning, "User 77 doesn't exist"));
        assert!(h.log.contains(Level::Warning, "Invalid email 'not-an-email'"));

        assert_eq!(h.count("SELECT COUNT(*) FROM events WHERE id = 43 AND creator_id = 0"), 1);
        assert!(h.log.contains(Level::Warning, "Event 43 has no creator"));
    }
}
