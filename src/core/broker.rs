use crate::core::error::{MigrateError, Result};
use crate::core::time;
use crate::core::tui::StepStatus;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const JOURNAL_FILE: &str = "migration.events.jsonl";

/// Append-only record of step transitions.
///
/// Unlike the log buffer, which is only written when the run ends, every
/// line here hits the disk immediately, so a killed run still leaves a
/// trace of how far it got.
pub struct StepBroker {
    journal_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub ts: String,
    pub event_id: String,
    pub step: String,
    pub status: String,
}

impl StepBroker {
    /// Journal next to the run's log file.
    pub fn beside(log_file: &Path) -> Self {
        let dir = log_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self {
            journal_path: dir.join(JOURNAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.journal_path
    }

    /// Run `f` as step `name`, journaling the transition into and out of it.
    pub fn with_step<F, R>(&self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        self.record(name, StepStatus::Running)?;
        let result = f();
        let status = if result.is_ok() {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        self.record(name, status)?;
        result
    }

    pub fn record(&self, step: &str, status: StepStatus) -> Result<()> {
        let ev = StepEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            step: step.to_string(),
            status: status.label().to_string(),
        };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<StepEvent>> {
        let text = match fs::read_to_string(&self.journal_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MigrateError::IoError(e)),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(MigrateError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_records_transitions() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let broker = StepBroker::beside(&tmp.path().join("migration.log"));
        broker.with_step("users", || Ok(())).unwrap();
        let err = broker
            .with_step("categories", || -> Result<()> {
                Err(MigrateError::LegacyData("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, MigrateError::LegacyData(_)));
        broker.record("events", StepStatus::Skipped).unwrap();

        let events = broker.read().unwrap();
        let seen: Vec<(&str, &str)> = events
            .iter()
            .map(|e| (e.step.as_str(), e.status.as_str()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("users", "running"),
                ("users", "completed"),
                ("categories", "running"),
                ("categories", "failed"),
                ("events", "skipped"),
            ]
        );
        assert_ne!(events[0].event_id, events[1].event_id);
    }

    #[test]
    fn bare_log_file_name_uses_current_dir() {
        let broker = StepBroker::beside(Path::new("migration.log"));
        assert_eq!(broker.path(), Path::new("./migration.events.jsonl"));
    }
}
