//! The migrator contract and the context every step is built from.
//!
//! A run is a fixed list of [`StepSpec`]s. Each spec builds a
//! [`Migrator`] over the whole legacy graph; the events step in turn drives
//! a list of event-scoped migrators, one legacy event at a time.

use crate::core::config::MigrationConfig;
use crate::core::db::Destination;
use crate::core::error::Result;
use crate::core::files::FileResolver;
use crate::core::graph::LegacyGraph;
use crate::core::logger::MigrationLogger;
use crate::core::namespace::{NsHandle, global_namespace};
use crate::core::principal::PrincipalResolver;
use crate::core::state::MigrationStateManager;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Nothing to do for this unit; the reason is logged, not raised.
    Skipped(String),
}

/// Unit of work for top-level steps.
pub struct WholeGraph;

pub trait Migrator<Unit: ?Sized> {
    fn name(&self) -> &'static str;

    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, unit: &mut Unit) -> Result<Outcome>;

    /// Called after `run`, whether or not it succeeded.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Drive one migrator through `prepare`, `run` and `finish`. `finish` runs
/// even when an earlier phase failed; the first error wins.
pub fn drive<U: ?Sized>(migrator: &mut dyn Migrator<U>, unit: &mut U) -> Result<Outcome> {
    let result = migrator.prepare().and_then(|_| migrator.run(unit));
    let finished = migrator.finish();
    let outcome = result?;
    finished?;
    Ok(outcome)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxScope {
    /// The driver wraps the whole step in one transaction.
    PerStep,
    /// The step commits on its own schedule.
    SelfManaged,
}

pub type BuildFn = fn(&StepContext) -> Result<Box<dyn Migrator<WholeGraph>>>;

pub struct StepSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub scope: TxScope,
    pub build: BuildFn,
}

/// Everything a step may touch, shared by handle.
#[derive(Clone)]
pub struct StepContext {
    pub global: NsHandle,
    pub graph: Rc<dyn LegacyGraph>,
    /// Room-booking graph; the main graph when rooms live there.
    pub rb_graph: Option<Rc<dyn LegacyGraph>>,
    pub dest: Rc<Destination>,
    pub config: Rc<MigrationConfig>,
    pub log: Rc<dyn MigrationLogger>,
    pub state: Rc<RefCell<MigrationStateManager>>,
    pub files: Rc<dyn FileResolver>,
    pub principals: Rc<PrincipalResolver>,
}

impl StepContext {
    pub fn new(
        config: Rc<MigrationConfig>,
        graph: Rc<dyn LegacyGraph>,
        rb_graph: Option<Rc<dyn LegacyGraph>>,
        dest: Rc<Destination>,
        log: Rc<dyn MigrationLogger>,
        files: Rc<dyn FileResolver>,
    ) -> Self {
        let global = global_namespace().into_handle();
        let mut state = MigrationStateManager::new();
        state.register_namespace(&global);
        let principals = Rc::new(PrincipalResolver::new(
            global.clone(),
            &config.default_group_provider,
            log.clone(),
        ));
        Self {
            global,
            graph,
            rb_graph,
            dest,
            config,
            log,
            state: Rc::new(RefCell::new(state)),
            files,
            principals,
        }
    }
}
