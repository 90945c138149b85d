//! Run configuration.
//!
//! Values come from command-line flags, optionally layered over a TOML file
//! (`--config`). Flags given explicitly always win.

use crate::core::error::{MigrateError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_FILE: &str = "migration.log";

/// Optional defaults read from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ldap_provider_name: Option<String>,
    pub default_group_provider: Option<String>,
    pub ignore_local_accounts: Option<bool>,
    pub system_user_id: Option<i64>,
    pub default_email: Option<String>,
    pub default_currency: Option<String>,
    pub archive_dirs: Option<Vec<PathBuf>>,
    pub storage_backend: Option<String>,
    pub avoid_storage_check: Option<bool>,
    pub symlink_backend: Option<String>,
    pub symlink_target: Option<PathBuf>,
    pub rb_source: Option<String>,
    pub reference_types: Option<Vec<String>>,
    pub migrate_broken_events: Option<bool>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub destination_uri: String,
    pub source_uri: String,
    /// Separate room-booking dump; rooms are looked up in the main graph
    /// when absent.
    pub rb_source_uri: Option<String>,
    pub verbose: bool,
    pub dblog: bool,
    pub debug: bool,
    pub no_gui: bool,
    pub ldap_provider_name: String,
    pub default_group_provider: String,
    pub ignore_local_accounts: bool,
    pub system_user_id: Option<i64>,
    pub default_email: String,
    pub default_currency: String,
    pub archive_dirs: Vec<PathBuf>,
    pub storage_backend: String,
    pub avoid_storage_check: bool,
    pub symlink_backend: Option<String>,
    pub symlink_target: Option<PathBuf>,
    pub reference_types: Vec<String>,
    pub migrate_broken_events: bool,
    pub save_restore: Option<PathBuf>,
    pub restore_file: Option<PathBuf>,
    pub log_file: PathBuf,
}

impl MigrationConfig {
    /// Config with the required values set and every option at its default.
    pub fn new(
        destination_uri: &str,
        source_uri: &str,
        default_email: &str,
        default_currency: &str,
        archive_dirs: Vec<PathBuf>,
        storage_backend: &str,
    ) -> Self {
        Self {
            destination_uri: destination_uri.to_string(),
            source_uri: source_uri.to_string(),
            rb_source_uri: None,
            verbose: false,
            dblog: false,
            debug: false,
            no_gui: true,
            ldap_provider_name: "ldap".to_string(),
            default_group_provider: "ldap".to_string(),
            ignore_local_accounts: false,
            system_user_id: None,
            default_email: default_email.to_string(),
            default_currency: default_currency.to_string(),
            archive_dirs,
            storage_backend: storage_backend.to_string(),
            avoid_storage_check: false,
            symlink_backend: None,
            symlink_target: None,
            reference_types: Vec::new(),
            migrate_broken_events: false,
            save_restore: None,
            restore_file: None,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }

    /// Cross-option rules that clap cannot express.
    pub fn validate(&mut self) -> Result<()> {
        if self.default_email.trim().is_empty() {
            return Err(MigrateError::Usage("--default-email is required".into()));
        }
        if self.default_currency.trim().is_empty() {
            return Err(MigrateError::Usage("--default-currency is required".into()));
        }
        if self.storage_backend.trim().is_empty() {
            return Err(MigrateError::Usage("--storage-backend is required".into()));
        }
        if self.archive_dirs.is_empty() {
            return Err(MigrateError::Usage("at least one --archive-dir is required".into()));
        }
        if (self.avoid_storage_check || self.symlink_target.is_some()) && self.archive_dirs.len() != 1 {
            return Err(MigrateError::Usage(
                "--avoid-storage-check and --symlink-target require exactly one --archive-dir".into(),
            ));
        }
        if self.symlink_target.is_some() != self.symlink_backend.is_some() {
            return Err(MigrateError::Usage(
                "--symlink-backend and --symlink-target must be used together".into(),
            ));
        }
        if self.restore_file.is_some() {
            self.debug = true;
        }
        Ok(())
    }

    /// Fill every option not given on the command line from `file`.
    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.ldap_provider_name {
            self.ldap_provider_name = v;
        }
        if let Some(v) = file.default_group_provider {
            self.default_group_provider = v;
        }
        self.ignore_local_accounts |= file.ignore_local_accounts.unwrap_or(false);
        self.system_user_id = self.system_user_id.or(file.system_user_id);
        if self.default_email.is_empty() {
            self.default_email = file.default_email.unwrap_or_default();
        }
        if self.default_currency.is_empty() {
            self.default_currency = file.default_currency.unwrap_or_default();
        }
        if self.archive_dirs.is_empty() {
            self.archive_dirs = file.archive_dirs.unwrap_or_default();
        }
        if self.storage_backend.is_empty() {
            self.storage_backend = file.storage_backend.unwrap_or_default();
        }
        self.avoid_storage_check |= file.avoid_storage_check.unwrap_or(false);
        self.symlink_backend = self.symlink_backend.take().or(file.symlink_backend);
        self.symlink_target = self.symlink_target.take().or(file.symlink_target);
        self.rb_source_uri = self.rb_source_uri.take().or(file.rb_source);
        if self.reference_types.is_empty() {
            self.reference_types = file.reference_types.unwrap_or_default();
        }
        self.migrate_broken_events |= file.migrate_broken_events.unwrap_or(false);
        if let Some(v) = file.log_file {
            if self.log_file == Path::new(DEFAULT_LOG_FILE) {
                self.log_file = v;
            }
        }
    }
}
