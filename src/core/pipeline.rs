//! The pipeline driver: runs the fixed step list in order, skipping steps a
//! restore point already recorded as completed.

use crate::core::broker::StepBroker;
use crate::core::error::{MigrateError, Result};
use crate::core::migration::{Outcome, StepContext, StepSpec, TxScope, WholeGraph, drive};
use crate::core::tui::StepStatus;

pub struct Pipeline {
    ctx: StepContext,
    steps: Vec<StepSpec>,
    broker: StepBroker,
    summary: Vec<(String, StepStatus)>,
}

impl Pipeline {
    pub fn new(ctx: StepContext, steps: Vec<StepSpec>, broker: StepBroker) -> Self {
        let summary = steps
            .iter()
            .map(|s| (s.name.to_string(), StepStatus::Pending))
            .collect();
        Self {
            ctx,
            steps,
            broker,
            summary,
        }
    }

    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    /// Final status of every step, in pipeline order.
    pub fn summary(&self) -> &[(String, StepStatus)] {
        &self.summary
    }

    /// Run all pending steps. On failure the open transaction is rolled back,
    /// a restore point is written if requested, and the error is returned.
    pub fn run(&mut self) -> Result<()> {
        for idx in 0..self.steps.len() {
            let name = self.steps[idx].name;
            if self.ctx.state.borrow().has_already_run(name) {
                self.ctx
                    .log
                    .info(&format!("Skipping previously-run step {}", name));
                self.broker.record(name, StepStatus::Skipped)?;
                self.summary[idx].1 = StepStatus::Skipped;
                continue;
            }
            self.summary[idx].1 = StepStatus::Running;
            let spec = &self.steps[idx];
            let ctx = &self.ctx;
            let result = self.broker.with_step(name, || run_step(ctx, spec));
            match result {
                Ok(outcome) => {
                    if let Outcome::Skipped(reason) = &outcome {
                        self.ctx.log.info(&format!("Nothing to do: {}", reason));
                    }
                    self.ctx.state.borrow_mut().register_step(name);
                    self.summary[idx].1 = match outcome {
                        Outcome::Done => StepStatus::Completed,
                        Outcome::Skipped(_) => StepStatus::Skipped,
                    };
                }
                Err(err) => {
                    self.summary[idx].1 = StepStatus::Failed;
                    let err = MigrateError::step_failed(name, err);
                    self.fail(&err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn fail(&self, err: &MigrateError) {
        let log = &self.ctx.log;
        log.save_exception(err);
        if let Err(e) = self.ctx.dest.rollback() {
            log.error(&format!("Rollback failed: {}", e));
        }
        if let Some(path) = &self.ctx.config.save_restore {
            match self.ctx.state.borrow().save_restore_point(path) {
                Ok(()) => log.warning(&format!("Restore point saved to {}", path.display())),
                Err(e) => log.error(&format!("Could not save restore point: {}", e)),
            }
        }
        if self.ctx.config.debug {
            log.wait_for_input();
        }
    }
}

fn run_step(ctx: &StepContext, spec: &StepSpec) -> Result<Outcome> {
    ctx.log.step(spec.name, spec.description);
    let mut migrator = (spec.build)(ctx)?;
    tracing::debug!(target: "conf_migrate", step = spec.name, migrator = migrator.name(), "starting");
    if spec.scope == TxScope::PerStep {
        ctx.dest.begin()?;
    }
    let outcome = drive(migrator.as_mut(), &mut WholeGraph)?;
    if spec.scope == TxScope::PerStep {
        ctx.dest.commit()?;
    }
    Ok(outcome)
}
