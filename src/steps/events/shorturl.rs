//! Event URL shortcuts.
//!
//! Legacy shortcuts were case-sensitive. Two events whose shortcuts differ
//! only in case both lose theirs: a 404 beats landing on the wrong event.

use super::{EventContext, EventMigrator};
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::namespace::{NsValue, global};
use crate::core::refs::EntityRef;
use regex::Regex;
use rusqlite::params;
use std::sync::LazyLock;

static ALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-a-zA-Z0-9/._ &@]+$").unwrap());

pub struct ShortUrls {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(ShortUrls { ctx: ctx.clone() })
}

/// Reason a shortcut cannot be kept, if any.
pub fn validate(shortcut: &str) -> Option<&'static str> {
    if shortcut.chars().all(|c| c.is_ascii_digit()) {
        return Some("only-digits");
    }
    if shortcut.contains("http://") || shortcut.contains("https://") {
        return Some("url");
    }
    if !ALLOWED.is_match(shortcut) || shortcut.contains("//") {
        return Some("invalid-chars");
    }
    if shortcut.starts_with('/') {
        return Some("leading-slash");
    }
    if shortcut.ends_with('/') {
        return Some("trailing-slash");
    }
    None
}

impl Migrator<EventContext> for ShortUrls {
    fn name(&self) -> &'static str {
        "shorturl"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        let shortcut = ectx.legacy.short_url_tag.as_str();
        if shortcut.is_empty() {
            return Ok(Outcome::Done);
        }
        if let Some(reason) = validate(shortcut) {
            self.ctx.log.event_warning(
                ectx.legacy_id(),
                &format!("Shorturl {} is invalid: {}", shortcut, reason),
            );
            return Ok(Outcome::Done);
        }

        let key = NsValue::from(shortcut.to_lowercase());
        let conflict = self.ctx.global.borrow().lookup_entity(global::USED_SHORT_URLS, &key)?;
        if let Some(other) = conflict {
            self.ctx.log.event_error(
                ectx.legacy_id(),
                &format!("Shorturl {} collides with that of event {}; discarding both", shortcut, other.id),
            );
            self.ctx.dest.execute(
                "UPDATE events SET url_shortcut = NULL WHERE id = ?1",
                params![other.id],
            )?;
            return Ok(Outcome::Done);
        }
        self.ctx
            .global
            .borrow_mut()
            .insert(global::USED_SHORT_URLS, key, EntityRef::event(ectx.event_id))?;
        self.ctx.dest.execute(
            "UPDATE events SET url_shortcut = ?1 WHERE id = ?2",
            params![shortcut, ectx.event_id],
        )?;
        Ok(Outcome::Done)
    }
}
