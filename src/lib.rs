//! conf-migrate: one-shot migration of a legacy conference-management object
//! graph into its relational successor schema.
//!
//! The legacy data is a dump of persistent objects (users, groups, the
//! category tree, events with their sessions, contributions, timetables and
//! materials, room booking data). The migration reads it once, in a fixed
//! order of steps, and writes rows into a SQLite destination.
//!
//! # Architecture
//!
//! ## Shared state
//!
//! Steps talk to each other only through namespaces: typed key/value stores
//! mapping legacy identities to destination rows (`core::namespace`). The
//! global namespace lives for the whole run; an event namespace lives for
//! one legacy event.
//!
//! ## Restore points
//!
//! A failed run can write a restore point (completed steps plus every
//! registered namespace). Restarting with `--restore-file` skips completed
//! steps and resumes with the saved mappings. The events step commits per
//! event, so a crash inside it loses at most one event.
//!
//! ## Steps
//!
//! `global_pre_events` → `users` → `rooms_locations` → `categories` →
//! `events` → `room_bookings` → `global_post_events`. See [`steps`].
//!
//! # Logging
//!
//! Operator output goes through [`core::logger::MigrationLogger`]; every
//! message is also emitted as a `tracing` event under the `conf_migrate`
//! target and kept in a buffer written to the log file when the run ends.

pub mod core;
pub mod steps;

use crate::core::broker::StepBroker;
use crate::core::codec::LiveResolver;
use crate::core::config::{DEFAULT_LOG_FILE, FileConfig, MigrationConfig};
use crate::core::db::{self, Destination};
use crate::core::error::Result;
use crate::core::files::ArchiveResolver;
use crate::core::graph::{JsonGraph, LegacyGraph};
use crate::core::logger::{ConsoleLogger, DashboardLogger, MigrationLogger};
use crate::core::migration::StepContext;
use crate::core::pipeline::Pipeline;
use crate::core::schemas;
use crate::core::state::RestorePoint;
use crate::core::tui;

use clap::Parser;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Parser, Debug)]
#[clap(
    name = "conf-migrate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Migrate a legacy conference database dump into the new schema"
)]
pub struct Cli {
    /// Destination database (`sqlite:///path` or a plain path)
    destination: String,

    /// Legacy dump (`file:///path` or a plain path)
    source: String,

    /// Fallback contact email for events and users without a valid one
    #[clap(long)]
    default_email: Option<String>,

    /// Currency for registration and payment settings
    #[clap(long)]
    default_currency: Option<String>,

    /// Archive root holding legacy files; may be repeated
    #[clap(long = "archive-dir")]
    archive_dirs: Vec<PathBuf>,

    /// Storage backend name recorded for migrated files
    #[clap(long)]
    storage_backend: Option<String>,

    #[clap(short, long)]
    verbose: bool,

    /// Log every SQL statement
    #[clap(short = 'L', long)]
    dblog: bool,

    #[clap(long)]
    ldap_provider_name: Option<String>,

    #[clap(long)]
    default_group_provider: Option<String>,

    /// Do not create local identities from legacy passwords
    #[clap(long)]
    ignore_local_accounts: bool,

    /// Use this id for the system user
    #[clap(long)]
    system_user_id: Option<i64>,

    /// Trust the archive and record files without opening them
    #[clap(long)]
    avoid_storage_check: bool,

    #[clap(long)]
    symlink_backend: Option<String>,

    /// Directory receiving symlinks for files with non-UTF-8 paths
    #[clap(long)]
    symlink_target: Option<PathBuf>,

    /// Separate room booking dump
    #[clap(long)]
    rb_source: Option<String>,

    /// Route events without a category into a "Lost & Found" category
    #[clap(long)]
    migrate_broken_events: bool,

    /// Wait for the operator before exiting on failure
    #[clap(long)]
    debug: bool,

    /// Plain console output instead of progress bars
    #[clap(long)]
    no_gui: bool,

    /// Write a restore point here if the run fails
    #[clap(long)]
    save_restore: Option<PathBuf>,

    /// Resume from a restore point
    #[clap(long)]
    restore_file: Option<PathBuf>,

    #[clap(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// TOML file with defaults for any of the options above
    #[clap(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Layer flags over the optional config file and validate the result.
    pub fn into_config(self) -> Result<MigrationConfig> {
        let mut config = MigrationConfig::new(
            &self.destination,
            &self.source,
            self.default_email.as_deref().unwrap_or_default(),
            self.default_currency.as_deref().unwrap_or_default(),
            self.archive_dirs,
            self.storage_backend.as_deref().unwrap_or_default(),
        );
        config.rb_source_uri = self.rb_source;
        config.verbose = self.verbose;
        config.dblog = self.dblog;
        config.debug = self.debug;
        config.no_gui = self.no_gui;
        config.ignore_local_accounts = self.ignore_local_accounts;
        config.system_user_id = self.system_user_id;
        config.avoid_storage_check = self.avoid_storage_check;
        config.symlink_backend = self.symlink_backend;
        config.symlink_target = self.symlink_target;
        config.migrate_broken_events = self.migrate_broken_events;
        config.save_restore = self.save_restore;
        config.restore_file = self.restore_file;
        config.log_file = self.log_file;
        if let Some(path) = &self.config {
            config.apply_file(FileConfig::load(path)?);
        }
        // Flags win over the file.
        if let Some(v) = self.ldap_provider_name {
            config.ldap_provider_name = v;
        }
        if let Some(v) = self.default_group_provider {
            config.default_group_provider = v;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Room booking data: the separate dump if given, else the main graph when
/// it carries room booking roots.
fn rb_graph(config: &MigrationConfig, graph: &Rc<dyn LegacyGraph>) -> Result<Option<Rc<dyn LegacyGraph>>> {
    if let Some(uri) = &config.rb_source_uri {
        return Ok(Some(Rc::new(JsonGraph::open(uri)?)));
    }
    let has_rooms = ["Locations", "Rooms"]
        .iter()
        .any(|root| graph.root_entry(root).is_some());
    Ok(has_rooms.then(|| Rc::clone(graph)))
}

/// Open both sides, apply the restore point if any, and return a pipeline
/// ready to run. Fails before any step when the destination already holds
/// data or the restore point does not match.
pub fn build_pipeline(config: MigrationConfig, log: Rc<dyn MigrationLogger>) -> Result<Pipeline> {
    let dest = Destination::open(&config.destination_uri)?.with_sql_logging(config.dblog);
    dest.prepare_schema()?;
    if config.restore_file.is_none() {
        if let Some(table) = dest.has_data()? {
            return Err(db::not_empty(table));
        }
    }

    let graph: Rc<dyn LegacyGraph> = Rc::new(JsonGraph::open(&config.source_uri)?);
    let rb_graph = rb_graph(&config, &graph)?;

    let mut files = ArchiveResolver::new(config.archive_dirs.clone(), &config.storage_backend)
        .avoid_storage_check(config.avoid_storage_check);
    if let (Some(backend), Some(target)) = (&config.symlink_backend, &config.symlink_target) {
        files = files.with_symlinks(backend, target.clone());
    }

    let broker = StepBroker::beside(&config.log_file);
    let restore_file = config.restore_file.clone();
    let ctx = StepContext::new(
        Rc::new(config),
        graph,
        rb_graph,
        Rc::new(dest),
        log,
        Rc::new(files),
    );

    if let Some(path) = restore_file {
        let data = RestorePoint::read(&path)?;
        for (table, rows) in ctx.dest.preload(schemas::DATA_TABLES)? {
            ctx.log.log(&format!("Preloaded {} rows from {}", rows, table));
        }
        let resolver = LiveResolver {
            dest: ctx.dest.as_ref(),
            graph: ctx.graph.as_ref(),
        };
        let dropped = ctx
            .state
            .borrow_mut()
            .load_restore_point(&data, &resolver)?;
        ctx.log.info(&format!(
            "Restored {} completed steps from {}",
            data.steps.len(),
            path.display()
        ));
        if dropped > 0 {
            ctx.log.warning(&format!(
                "Dropped {} restore point references to objects that no longer exist",
                dropped
            ));
        }
    }

    Ok(Pipeline::new(ctx, steps::all_steps(), broker))
}

/// Run the migration described by `config`. The log buffer is written to
/// the log file whatever the outcome.
pub fn migrate(config: MigrationConfig, log: Rc<dyn MigrationLogger>) -> Result<()> {
    let log_file = config.log_file.clone();
    let result = match build_pipeline(config, Rc::clone(&log)) {
        Ok(mut pipeline) => {
            let result = pipeline.run();
            tui::print_step_summary(pipeline.summary());
            result
        }
        Err(err) => {
            log.save_exception(&err);
            Err(err)
        }
    };
    if result.is_ok() {
        log.success("Migration finished");
    }
    if let Err(e) = log.save_to_disk(&log_file) {
        tracing::error!(target: "conf_migrate", "could not write {}: {}", log_file.display(), e);
    }
    result
}

/// Parse the command line and migrate. `init_tracing` runs once the
/// options are known and before anything is opened.
pub fn run(init_tracing: impl FnOnce(&MigrationConfig)) -> Result<()> {
    run_cli(Cli::parse(), init_tracing)
}

fn run_cli(cli: Cli, init_tracing: impl FnOnce(&MigrationConfig)) -> Result<()> {
    let config = cli.into_config()?;
    init_tracing(&config);
    let log: Rc<dyn MigrationLogger> = if config.no_gui {
        Rc::new(ConsoleLogger::new(!config.verbose))
    } else {
        Rc::new(DashboardLogger::new(config.verbose))
    };
    migrate(config, log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::MigrateError;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("conf-migrate").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn required_options_come_from_flags() {
        let config = parse(&[
            "dest.db",
            "dump.json",
            "--default-email",
            "noreply@example.org",
            "--default-currency",
            "EUR",
            "--archive-dir",
            "/a",
            "--archive-dir",
            "/b",
            "--storage-backend",
            "fs",
            "-L",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.archive_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(config.dblog);
        assert_eq!(config.log_file, PathBuf::from(DEFAULT_LOG_FILE));
    }

    #[test]
    fn missing_required_option_is_a_usage_error() {
        let err = parse(&["dest.db", "dump.json", "--default-currency", "EUR"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, MigrateError::Usage(_)));
    }

    #[test]
    fn config_file_fills_required_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.toml");
        std::fs::write(
            &path,
            r#"
            default_email = "noreply@example.org"
            default_currency = "CHF"
            archive_dirs = ["/archive"]
            storage_backend = "fs"
            "#,
        )
        .unwrap();
        let config = parse(&[
            "dest.db",
            "dump.json",
            "--default-currency",
            "EUR",
            "--config",
            path.to_str().unwrap(),
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.default_currency, "EUR");
        assert_eq!(config.default_email, "noreply@example.org");
        assert_eq!(config.storage_backend, "fs");
    }

    #[test]
    fn flags_win_over_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.toml");
        std::fs::write(
            &path,
            r#"
            ldap_provider_name = "from-file"
            default_group_provider = "file-groups"
            "#,
        )
        .unwrap();
        let config = parse(&[
            "dest.db",
            "dump.json",
            "--default-email",
            "noreply@example.org",
            "--default-currency",
            "EUR",
            "--archive-dir",
            "/a",
            "--storage-backend",
            "fs",
            "--ldap-provider-name",
            "corp-ldap",
            "--config",
            path.to_str().unwrap(),
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.ldap_provider_name, "corp-ldap");
        assert_eq!(config.default_group_provider, "file-groups");
    }

    #[test]
    fn tracing_is_set_up_from_parsed_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name).to_string_lossy().into_owned();
        let (dest, source, archive, log_file) = (
            path("dest.db"),
            path("missing.json"),
            dir.path().to_string_lossy().into_owned(),
            path("migration.log"),
        );
        let cli = parse(&[
            dest.as_str(),
            source.as_str(),
            "--default-email",
            "noreply@example.org",
            "--default-currency",
            "EUR",
            "--archive-dir",
            archive.as_str(),
            "--storage-backend",
            "fs",
            "--dblog",
            "--no-gui",
            "--log-file",
            log_file.as_str(),
        ]);
        let mut dblog = None;
        let result = run_cli(cli, |config| dblog = Some(config.dblog));
        assert!(result.is_err());
        assert_eq!(dblog, Some(true));
    }
}
