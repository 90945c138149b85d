//! The category tree, walked from the root with sibling positions taken
//! from the legacy `_order`.

use crate::core::decode::{self, LegacyCategory};
use crate::core::error::{MigrateError, Result};
use crate::core::graph::LegacyGraph;
use crate::core::migration::{Migrator, Outcome, StepContext, WholeGraph};
use crate::core::namespace::{NsValue, global};
use crate::core::principal::Grant;
use crate::core::text::sanitize_user_input;
use crate::core::time::parse_tz;
use crate::steps::{grant_all, grant_domains, server_info};
use rusqlite::params;

pub const TABLE: &str = "category_principals";

pub struct Categories {
    ctx: StepContext,
    server_tz: String,
    next_legacy_id: i64,
    migrated: usize,
}

pub fn build(ctx: &StepContext) -> Result<Box<dyn Migrator<WholeGraph>>> {
    Ok(Box::new(Categories {
        ctx: ctx.clone(),
        server_tz: String::new(),
        next_legacy_id: 0,
        migrated: 0,
    }))
}

/// Visibility depth; values above 900 meant unlimited.
pub fn visibility(raw: Option<i64>) -> (Option<i64>, bool) {
    match raw {
        Some(v) if v > 900 => (None, false),
        Some(0) => (Some(1), true),
        other => (other, false),
    }
}

pub fn protection_mode(protection: i64, is_root: bool) -> &'static str {
    match protection {
        -1 => "public",
        0 if is_root => "public",
        1 => "protected",
        _ => "inheriting",
    }
}

impl Categories {
    fn allocate_id(&mut self, legacy_id: &str) -> Result<i64> {
        if !decode::is_legacy_id(legacy_id) {
            if let Ok(id) = legacy_id.parse::<i64>() {
                if !self.ctx.dest.row_exists("categories", id)? {
                    return Ok(id);
                }
            }
        }
        loop {
            self.next_legacy_id += 1;
            if !self.ctx.dest.row_exists("categories", self.next_legacy_id)? {
                return Ok(self.next_legacy_id);
            }
        }
    }

    fn migrate_category(
        &mut self,
        graph: &dyn LegacyGraph,
        cat: &LegacyCategory,
        parent: Option<i64>,
        position: i64,
    ) -> Result<()> {
        let ctx = self.ctx.clone();
        let id = self.allocate_id(&cat.id)?;
        if id.to_string() != cat.id {
            ctx.dest.execute(
                "INSERT INTO legacy_category_mappings (legacy_category_id, category_id) VALUES (?1, ?2)",
                params![cat.id, id],
            )?;
            ctx.log
                .info(&format!("Category {} gets new id {}", cat.id, id));
        }

        let title = sanitize_user_input(&cat.name);
        if title != cat.name.trim() {
            ctx.log.warning(&format!(
                "Sanitized category title of {}: '{}' -> '{}'",
                cat.id,
                cat.name.trim(),
                title
            ));
        }
        let (visibility, raised) = visibility(cat.visibility);
        if raised {
            ctx.log
                .warning(&format!("Raised visibility of category {} from 0 to 1", cat.id));
        }
        let timezone = cat
            .timezone
            .as_deref()
            .filter(|tz| parse_tz(tz).is_some())
            .unwrap_or(&self.server_tz)
            .to_string();
        let mut mode = protection_mode(cat.access.protection, parent.is_none());
        if mode == "public" && !cat.access.required_domains.is_empty() {
            mode = "protected";
        }

        ctx.dest.execute(
            "INSERT INTO categories (id, parent_id, position, title, description, timezone, visibility,
             protection_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                parent,
                position,
                title,
                cat.description.trim(),
                timezone,
                visibility,
                mode
            ],
        )?;

        let context = format!("category {}", cat.id);
        grant_domains(&ctx, TABLE, "category_id", id, &cat.access.required_domains, &context)?;
        grant_all(&ctx, TABLE, "category_id", id, &cat.access.allowed, &Grant::read(), &context)?;
        grant_all(&ctx, TABLE, "category_id", id, &cat.access.managers, &Grant::manage(), &context)?;
        grant_all(&ctx, TABLE, "category_id", id, &cat.creators, &Grant::role("create"), &context)?;

        let fans: Vec<i64> = ctx
            .global
            .borrow()
            .setmap(global::USER_FAVORITE_CATEGORIES)?
            .get(&NsValue::from(cat.id.as_str()))
            .map(|users| users.iter().filter_map(NsValue::as_entity).map(|u| u.id).collect())
            .unwrap_or_default();
        for user in fans {
            ctx.dest.execute(
                "INSERT OR IGNORE INTO favorite_categories (user_id, category_id) VALUES (?1, ?2)",
                params![user, id],
            )?;
        }

        ctx.global.borrow_mut().insert(
            global::LEGACY_CATEGORY_IDS,
            NsValue::from(cat.id.as_str()),
            crate::core::refs::EntityRef::category(id),
        )?;
        self.migrated += 1;
        ctx.log.progress_tick();

        let mut children = Vec::with_capacity(cat.subcategories.len());
        for oid in &cat.subcategories {
            match graph.load(*oid) {
                Ok(obj) => children.push(decode::category(graph, &obj)?),
                Err(MigrateError::MissingObject(missing)) => ctx
                    .log
                    .warning(&format!("Skipping missing subcategory {} of {}", missing, cat.id)),
                Err(e) => return Err(e),
            }
        }
        children.sort_by_key(|c| c.order);
        for (pos, child) in children.iter().enumerate() {
            self.migrate_category(graph, child, Some(id), pos as i64 + 1)?;
        }
        Ok(())
    }
}

impl Migrator<WholeGraph> for Categories {
    fn name(&self) -> &'static str {
        "categories"
    }

    fn prepare(&mut self) -> Result<()> {
        let graph = self.ctx.graph.as_ref();
        self.server_tz = server_info(graph)?.timezone;
        self.next_legacy_id = decode::counter(graph, "CATEGORY")?
            .max(self.ctx.dest.max_id("categories")?);
        Ok(())
    }

    fn run(&mut self, _unit: &mut WholeGraph) -> Result<Outcome> {
        let ctx = self.ctx.clone();
        let graph = ctx.graph.as_ref();
        let root = decode::root_object(graph, "rootCategory")?
            .ok_or_else(|| MigrateError::LegacyData("dump has no root category".into()))?;
        let root = decode::category(graph, &root)?;
        if root.id != "0" {
            return Err(MigrateError::LegacyData(format!(
                "root category has id '{}', expected '0'",
                root.id
            )));
        }
        ctx.log.progress_start("Categories", 0);
        let result = self.migrate_category(graph, &root, None, 1);
        ctx.log.progress_end();
        result?;
        ctx.log.success(&format!("{} categories", self.migrated));
        Ok(Outcome::Done)
    }

    fn finish(&mut self) -> Result<()> {
        self.ctx.dest.fix_sequences(&["categories"])
    }
}
