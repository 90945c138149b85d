//! Completed-step tracking and restore points.

use crate::core::codec::RefResolver;
use crate::core::error::{MigrateError, Result};
use crate::core::namespace::NsHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const RESTORE_FORMAT_VERSION: u32 = 1;

/// On-disk form of a restore point.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RestorePoint {
    pub format_version: u32,
    pub steps: Vec<String>,
    pub namespaces: BTreeMap<String, JsonValue>,
}

impl RestorePoint {
    pub fn read(path: &Path) -> Result<RestorePoint> {
        let text = fs::read_to_string(path)?;
        let point: RestorePoint = serde_json::from_str(&text).map_err(|e| {
            MigrateError::RestoreMismatch(format!("{} is not a restore file: {}", path.display(), e))
        })?;
        if point.format_version != RESTORE_FORMAT_VERSION {
            return Err(MigrateError::RestoreMismatch(format!(
                "restore file version {} (expected {})",
                point.format_version, RESTORE_FORMAT_VERSION
            )));
        }
        Ok(point)
    }
}

#[derive(Default)]
pub struct MigrationStateManager {
    namespaces: BTreeMap<String, NsHandle>,
    steps: Vec<String>,
}

impl MigrationStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same name twice keeps the first handle.
    pub fn register_namespace(&mut self, ns: &NsHandle) {
        let name = ns.borrow().name().to_string();
        self.namespaces
            .entry(name)
            .or_insert_with(|| NsHandle::clone(ns));
    }

    pub fn unregister_namespace(&mut self, name: &str) {
        self.namespaces.remove(name);
    }

    pub fn register_step(&mut self, name: &str) {
        if !self.has_already_run(name) {
            self.steps.push(name.to_string());
        }
    }

    pub fn has_already_run(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s == name)
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn snapshot(&self) -> RestorePoint {
        RestorePoint {
            format_version: RESTORE_FORMAT_VERSION,
            steps: self.steps.clone(),
            namespaces: self
                .namespaces
                .iter()
                .map(|(name, ns)| (name.clone(), ns.borrow().serialize()))
                .collect(),
        }
    }

    /// Write a restore point atomically (temp file, then rename).
    pub fn save_restore_point(&self, dest: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.snapshot())?;
        let tmp = dest.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, dest)?;
        Ok(())
    }

    /// Load completed steps and every registered namespace. Entries for
    /// namespaces that are not registered (an event in flight) are ignored.
    /// Returns the number of stale references dropped.
    pub fn load_restore_point(
        &mut self,
        data: &RestorePoint,
        resolver: &dyn RefResolver,
    ) -> Result<usize> {
        let mut dropped = 0;
        for (name, ns) in &self.namespaces {
            let raw = data.namespaces.get(name).ok_or_else(|| {
                MigrateError::RestoreMismatch(format!("restore point has no namespace '{}'", name))
            })?;
            dropped += ns.borrow_mut().load(raw, resolver)?;
        }
        self.steps = data.steps.clone();
        Ok(dropped)
    }
}
