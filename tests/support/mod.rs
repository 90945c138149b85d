//! Shared fixtures for the integration tests: legacy dumps written with
//! `json!` and scratch directories holding the destination, the dump, the
//! archive and the log.

#![allow(dead_code)]

use conf_migrate::core::config::MigrationConfig;
use serde_json::{Value as JsonValue, json};
use std::path::PathBuf;
use tempfile::TempDir;

pub struct Scratch {
    pub dir: TempDir,
}

impl Scratch {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn db_uri(&self) -> String {
        format!("sqlite://{}", self.path("dest.db").display())
    }

    /// Config for a run over `dump`, with every file inside the scratch dir.
    pub fn config(&self, dump: &JsonValue) -> MigrationConfig {
        let dump_path = self.path("dump.json");
        std::fs::write(&dump_path, serde_json::to_vec_pretty(dump).expect("dump json")).expect("write dump");
        let archive = self.path("archive");
        std::fs::create_dir_all(&archive).expect("archive dir");
        let mut config = MigrationConfig::new(
            &self.db_uri(),
            &format!("file://{}", dump_path.display()),
            "noreply@example.org",
            "EUR",
            vec![archive],
            "fs",
        );
        config.log_file = self.path("migration.log");
        config
    }
}

fn merge(into: &mut JsonValue, extra: JsonValue) {
    if let (Some(map), JsonValue::Object(more)) = (into.as_object_mut(), extra) {
        map.extend(more);
    }
}

pub fn avatar(id: &str, first: &str, last: &str, email: &str) -> JsonValue {
    json!({"class": "MaKaC.user.Avatar", "state": {
        "id": id, "name": first, "surName": last, "email": email
    }})
}

/// Three users, two groups and a root category. `conferences` lists the
/// oids of the events, which callers add through `extra`.
pub fn site(conferences: &[&str], extra: JsonValue) -> JsonValue {
    let mut objects = json!({
        "0x1": {"class": "MaKaC.common.info.MaKaCInfo", "state": {"_timezone": "UTC"}},
        "0x2": avatar("1", "Ada", "Lovelace", "ada@example.org"),
        "0x3": avatar("2", "Grace", "Hopper", "grace@example.org"),
        "0x4": avatar("3", "Alan", "Turing", "alan@example.org"),
        "0x20": {"class": "MaKaC.user.Group", "state": {
            "id": "7", "name": "Organizers", "members": [{"$ref": "0x2"}, {"$ref": "0x3"}]
        }},
        "0x21": {"class": "MaKaC.user.Group", "state": {"id": "8", "name": "Reviewers"}},
        "0x10": {"class": "MaKaC.conference.Category", "state": {"id": "0", "name": "Home"}}
    });
    merge(&mut objects, extra);
    let confs: Vec<JsonValue> = conferences.iter().map(|oid| json!({"$ref": oid})).collect();
    json!({
        "root": {
            "MaKaCInfo": {"$ref": "0x1"},
            "avatars": {"1": {"$ref": "0x2"}, "2": {"$ref": "0x3"}, "3": {"$ref": "0x4"}},
            "groups": {"7": {"$ref": "0x20"}, "8": {"$ref": "0x21"}},
            "rootCategory": {"$ref": "0x10"},
            "counters": {"CONFERENCE": 1000},
            "conferences": confs
        },
        "objects": objects
    })
}

/// A conference in the root category, or without any category when
/// `in_category` is false.
pub fn conference(id: &str, in_category: bool, extra: JsonValue) -> JsonValue {
    let mut state = json!({
        "id": id,
        "title": format!("Event {}", id),
        "timezone": "Europe/Zurich",
        "startDate": "2015-03-01T09:00:00+00:00",
        "endDate": "2015-03-01T18:00:00+00:00",
        "_creator": {"$ref": "0x2"},
        "_schedule": []
    });
    if in_category {
        state["owners"] = json!([{"$ref": "0x10"}]);
    }
    merge(&mut state, extra);
    json!({"class": "MaKaC.conference.Conference", "state": state})
}
