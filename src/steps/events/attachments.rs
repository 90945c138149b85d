//! Material folders and their links and files.
//!
//! Minutes without special protection become event notes instead; their
//! file is left out here.

use super::{EventContext, EventMigrator};
use crate::core::decode::{self, LegacyMaterial, LegacyResource};
use crate::core::error::{MigrateError, Result};
use crate::core::graph::Oid;
use crate::core::migration::{Migrator, Outcome, StepContext};
use crate::core::namespace::{NsValue, event};
use crate::steps::categories::protection_mode;
use crate::steps::system_user;
use rusqlite::params;

/// Something materials hang off: the event, a session or a contribution.
pub struct Linked {
    pub link_type: &'static str,
    pub session_id: Option<i64>,
    pub contribution_id: Option<i64>,
    pub label: String,
    pub materials: Vec<Oid>,
    pub minutes: Option<Oid>,
}

/// The event followed by every migrated session and contribution.
pub fn linked_objects(ctx: &StepContext, ectx: &EventContext) -> Result<Vec<Linked>> {
    let graph = ctx.graph.as_ref();
    let mut out = vec![Linked {
        link_type: "event",
        session_id: None,
        contribution_id: None,
        label: format!("Event {}", ectx.legacy_id()),
        materials: ectx.legacy.materials.clone(),
        minutes: ectx.legacy.minutes,
    }];
    let (sessions, contributions) = {
        let ns = ectx.ns.borrow();
        let pairs = |key: &str| -> Result<Vec<(NsValue, i64)>> {
            Ok(ns
                .map(key)?
                .iter()
                .filter_map(|(k, v)| v.as_entity().map(|e| (k.clone(), e.id)))
                .collect())
        };
        (pairs(event::LEGACY_SESSION_MAP)?, pairs(event::LEGACY_CONTRIBUTION_MAP)?)
    };
    for (key, id) in sessions {
        let NsValue::Legacy(legacy) = key else { continue };
        let session = decode::session(&*graph.load(legacy.oid)?);
        out.push(Linked {
            link_type: "session",
            session_id: Some(id),
            contribution_id: None,
            label: format!("Session {}", session.id),
            materials: session.materials,
            minutes: session.minutes,
        });
    }
    for (key, id) in contributions {
        let NsValue::Legacy(legacy) = key else { continue };
        let contrib = decode::contribution(graph, &*graph.load(legacy.oid)?)?;
        out.push(Linked {
            link_type: "contribution",
            session_id: None,
            contribution_id: Some(id),
            label: format!("Contribution {}", contrib.id),
            materials: contrib.materials,
            minutes: contrib.minutes,
        });
    }
    Ok(out)
}

pub fn load_material(ctx: &StepContext, oid: Oid) -> Result<Option<LegacyMaterial>> {
    let graph = ctx.graph.as_ref();
    match graph.load(oid) {
        Ok(obj) => decode::material(graph, &obj).map(Some),
        Err(MigrateError::MissingObject(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Index of the file a minutes material keeps its text in.
pub fn minutes_file(material: &LegacyMaterial) -> Option<usize> {
    material
        .resources
        .iter()
        .position(|r| matches!(r, LegacyResource::File { .. }))
}

/// Reduce a legacy file name to something safe to store.
pub fn secure_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(['.', '_']);
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

pub struct Attachments {
    ctx: StepContext,
}

pub fn build(ctx: &StepContext) -> EventMigrator {
    Box::new(Attachments { ctx: ctx.clone() })
}

impl Attachments {
    fn migrate_material(
        &self,
        ectx: &EventContext,
        linked: &Linked,
        material: &LegacyMaterial,
        is_minutes: bool,
        user: i64,
    ) -> Result<usize> {
        let skip = if is_minutes && material.protection <= 0 {
            minutes_file(material)
        } else {
            None
        };
        let resources: Vec<&LegacyResource> = material
            .resources
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, r)| r)
            .collect();
        if resources.is_empty() {
            return Ok(0);
        }

        let title = match material.title.trim() {
            "" => "Material",
            t => t,
        };
        let folder = self.ctx.dest.insert(
            "INSERT INTO attachment_folders (event_id, link_type, session_id, contribution_id, title,
             description, protection_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ectx.event_id,
                linked.link_type,
                linked.session_id,
                linked.contribution_id,
                title,
                material.description.trim(),
                protection_mode(material.protection, false)
            ],
        )?;

        let mut migrated = 0;
        for resource in resources {
            match resource {
                LegacyResource::Link {
                    title: name,
                    description,
                    url,
                } => {
                    let name = match name.trim() {
                        "" => title,
                        n => n,
                    };
                    if url.trim().is_empty() {
                        self.ctx
                            .log
                            .event_error(ectx.legacy_id(), &format!("[{}] Skipping link, missing URL", name));
                        continue;
                    }
                    self.ctx.dest.execute(
                        "INSERT INTO attachments (folder_id, type, title, description, link_url, user_id)
                         VALUES (?1, 'link', ?2, ?3, ?4, ?5)",
                        params![folder, name, description.trim(), url.trim(), user],
                    )?;
                }
                LegacyResource::File {
                    title: name,
                    description,
                    file_name,
                    archived_path,
                } => {
                    let name = match name.trim() {
                        "" => title,
                        n => n,
                    };
                    let info = match archived_path {
                        Some(path) => self.ctx.files.resolve(path)?,
                        None => None,
                    };
                    let Some(info) = info else {
                        self.ctx.log.event_error(
                            ectx.legacy_id(),
                            &format!("File {} not found on disk", archived_path.as_deref().unwrap_or(file_name)),
                        );
                        continue;
                    };
                    self.ctx.dest.execute(
                        "INSERT INTO attachments (folder_id, type, title, description, storage_backend,
                         storage_file_id, filename, size, checksum, user_id)
                         VALUES (?1, 'file', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            folder,
                            name,
                            description.trim(),
                            info.backend,
                            info.file_id,
                            secure_filename(file_name),
                            info.size as i64,
                            info.checksum,
                            user
                        ],
                    )?;
                }
                LegacyResource::Unsupported(class) => {
                    self.ctx
                        .log
                        .event_warning(ectx.legacy_id(), &format!("Skipping unsupported resource {}", class));
                    continue;
                }
            }
            migrated += 1;
        }
        Ok(migrated)
    }
}

impl Migrator<EventContext> for Attachments {
    fn name(&self) -> &'static str {
        "attachments"
    }

    fn run(&mut self, ectx: &mut EventContext) -> Result<Outcome> {
        let user = system_user(&self.ctx)?;
        let mut migrated = 0;
        for linked in linked_objects(&self.ctx, ectx)? {
            let all = linked.materials.iter().map(|m| (*m, false)).chain(linked.minutes.map(|m| (m, true)));
            for (oid, is_minutes) in all {
                if let Some(material) = load_material(&self.ctx, oid)? {
                    migrated += self.migrate_material(ectx, &linked, &material, is_minutes, user)?;
                }
            }
        }
        if migrated == 0 {
            return Ok(Outcome::Skipped("no attachments".into()));
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{conference, site};
    use super::*;
    use crate::core::logger::Level;
    use crate::steps::testing::harness;
    use serde_json::json;

    #[test]
    fn filenames() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("my slides.pdf"), "my_slides.pdf");
        assert_eq!(secure_filename("C:\\docs\\a.txt"), "a.txt");
        assert_eq!(secure_filename("..."), "attachment");
    }

    #[test]
    fn folders_links_and_files() {
        let h = harness(site(
            &["0x100"],
            json!({
                "0x100": conference("42", Some("0x11"), json!({
                    "materials": [{"$ref": "0x180"}],
                    "minutes": {"$ref": "0x181"},
                    "contributions": [{"$ref": "0x140"}]
                })),
                "0x140": {"class": "MaKaC.conference.Contribution", "state": {
                    "id": "1", "title": "Talk", "materials": [{"$ref": "0x182"}]
                }},
                "0x180": {"class": "MaKaC.conference.Material", "state": {
                    "id": "0", "title": "", "_resources": [{"$ref": "0x190"}, {"$ref": "0x191"}, {"$ref": "0x192"}]
                }},
                "0x190": {"class": "MaKaC.conference.Link", "state": {"name": "Site", "url": "https://example.org"}},
                "0x191": {"class": "MaKaC.conference.Link", "state": {"name": "Broken", "url": " "}},
                "0x192": {"class": "MaKaC.conference.LocalFile", "state": {
                    "name": "", "fileName": "my slides.pdf", "_archivedId": "2015/42/slides.pdf"
                }},
                "0x181": {"class": "MaKaC.conference.Minutes", "state": {
                    "id": "minutes", "title": "Minutes", "_resources": [{"$ref": "0x193"}]
                }},
                "0x193": {"class": "MaKaC.conference.LocalFile", "state": {
                    "name": "minutes", "fileName": "minutes.html", "_archivedId": "2015/42/minutes.html"
                }},
                "0x182": {"class": "MaKaC.conference.Material", "state": {
                    "id": "1", "title": "Paper", "_resources": [{"$ref": "0x194"}]
                }},
                "0x194": {"class": "MaKaC.conference.LocalFile", "state": {
                    "name": "Paper", "fileName": "paper.pdf", "_archivedId": "2015/42/missing.pdf"
                }}
            }),
        ));
        let dir = h.dir.path().join("archive/2015/42");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("slides.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.join("minutes.html"), b"<p>notes</p>").unwrap();
        h.run("users").unwrap();
        h.run("categories").unwrap();
        h.run("events").unwrap();

        assert_eq!(
            h.count("SELECT COUNT(*) FROM attachment_folders WHERE event_id = 42 AND link_type = 'event' AND title = 'Material'"),
            1
        );
        assert_eq!(h.count("SELECT COUNT(*) FROM attachments WHERE type = 'link' AND link_url = 'https://example.org'"), 1);
        assert_eq!(
            h.count("SELECT COUNT(*) FROM attachments WHERE type = 'file' AND title = 'Material'
                     AND filename = 'my_slides.pdf' AND size = 4 AND storage_backend = 'fs'
                     AND storage_file_id = '2015/42/slides.pdf'"),
            1
        );
        assert_eq!(h.count("SELECT COUNT(*) FROM attachment_folders WHERE title = 'Minutes'"), 0);
        assert_eq!(h.count("SELECT COUNT(*) FROM attachment_folders WHERE link_type = 'contribution' AND title = 'Paper'"), 1);
        assert!(h.log.contains(Level::Error, "[Broken] Skipping link, missing URL"));
        assert!(h.log.contains(Level::Error, "File 2015/42/missing.pdf not found on disk"));
        assert_eq!(h.count("SELECT COUNT(*) FROM event_notes WHERE event_id = 42 AND html = '<p>notes</p>'"), 1);
    }
}
