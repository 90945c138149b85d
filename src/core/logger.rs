//! Progress and logging facade.
//!
//! Migrators only see [`MigrationLogger`]; which presentation is used
//! (plain console or the progress-bar dashboard) is decided once in `main`.
//! Every backend keeps a plain-text copy of what it printed in a
//! [`LogBuffer`] that is written to disk when the run ends, and mirrors each
//! message to `tracing`.

use crate::core::error::{MigrateError, Result};
use crate::core::tui::{self, BoxStyle};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
    Log,
}

impl Level {
    pub fn tag(&self) -> &'static str {
        match self {
            Level::Success => "SUCCESS",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Log => "LOG",
        }
    }

    /// Warnings and errors are shown even in quiet mode.
    fn always(&self) -> bool {
        matches!(self, Level::Warning | Level::Error)
    }
}

#[derive(Default)]
pub struct LogBuffer {
    lines: RefCell<Vec<String>>,
}

impl LogBuffer {
    pub fn push(&self, line: String) {
        self.lines.borrow_mut().push(line);
    }

    pub fn len(&self) -> usize {
        self.lines.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contents(&self) -> String {
        let mut out = self.lines.borrow().join("\n");
        out.push('\n');
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.contents())?;
        Ok(())
    }
}

fn plain_line(step: &str, level: Level, msg: &str, event_id: Option<&str>) -> String {
    let mut line = String::new();
    if !step.is_empty() {
        line.push_str(&format!("[{}] ", step));
    }
    line.push_str(&format!("{:<7} {}", level.tag(), msg));
    if let Some(id) = event_id {
        line.push_str(&format!(" (event {})", id));
    }
    line
}

fn trace(level: Level, step: &str, msg: &str, event_id: Option<&str>) {
    let event = event_id.unwrap_or("-");
    match level {
        Level::Error => tracing::error!(target: "conf_migrate", step, event, "{}", msg),
        Level::Warning => tracing::warn!(target: "conf_migrate", step, event, "{}", msg),
        Level::Success | Level::Info => {
            tracing::info!(target: "conf_migrate", step, event, "{}", msg)
        }
        Level::Log => tracing::debug!(target: "conf_migrate", step, event, "{}", msg),
    }
}

pub trait MigrationLogger {
    fn emit(&self, level: Level, msg: &str, event_id: Option<&str>);

    /// Announce a new step; later messages are prefixed with its name.
    fn step(&self, name: &str, description: &str);

    fn progress_start(&self, label: &str, total: usize);

    fn progress_tick(&self);

    fn progress_end(&self);

    fn buffer(&self) -> &LogBuffer;

    /// Hold until the operator acknowledges. Used after a failure in debug mode.
    fn wait_for_input(&self) {}

    fn success(&self, msg: &str) {
        self.emit(Level::Success, msg, None);
    }

    fn info(&self, msg: &str) {
        self.emit(Level::Info, msg, None);
    }

    fn warning(&self, msg: &str) {
        self.emit(Level::Warning, msg, None);
    }

    fn error(&self, msg: &str) {
        self.emit(Level::Error, msg, None);
    }

    fn log(&self, msg: &str) {
        self.emit(Level::Log, msg, None);
    }

    fn event_warning(&self, event_id: &str, msg: &str) {
        self.emit(Level::Warning, msg, Some(event_id));
    }

    fn event_info(&self, event_id: &str, msg: &str) {
        self.emit(Level::Info, msg, Some(event_id));
    }

    fn event_error(&self, event_id: &str, msg: &str) {
        self.emit(Level::Error, msg, Some(event_id));
    }

    /// Record a fatal error with its full source chain.
    fn save_exception(&self, err: &MigrateError) {
        let mut report = format!("Migration failed: {}", err);
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            report.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }
        self.emit(Level::Error, &report, None);
    }

    fn save_to_disk(&self, path: &Path) -> Result<()> {
        self.buffer().save(path)
    }
}

/// Iterator adapter reporting progress through a logger.
pub struct Progress<'a, I> {
    inner: I,
    log: &'a dyn MigrationLogger,
    finished: bool,
}

impl<I: Iterator> Iterator for Progress<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        match self.inner.next() {
            Some(item) => {
                self.log.progress_tick();
                Some(item)
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

impl<I> Progress<'_, I> {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.log.progress_end();
        }
    }
}

impl<I> Drop for Progress<'_, I> {
    fn drop(&mut self) {
        self.finish();
    }
}

pub fn progress<'a, I>(log: &'a dyn MigrationLogger, label: &str, items: I) -> Progress<'a, I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: ExactSizeIterator,
{
    let inner = items.into_iter();
    log.progress_start(label, inner.len());
    Progress {
        inner,
        log,
        finished: false,
    }
}

/// Plain colored console output.
pub struct ConsoleLogger {
    quiet: bool,
    step: RefCell<String>,
    buffer: LogBuffer,
}

impl ConsoleLogger {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            step: RefCell::new(String::new()),
            buffer: LogBuffer::default(),
        }
    }
}

impl MigrationLogger for ConsoleLogger {
    fn emit(&self, level: Level, msg: &str, event_id: Option<&str>) {
        let step = self.step.borrow();
        self.buffer.push(plain_line(&step, level, msg, event_id));
        trace(level, &step, msg, event_id);
        if self.quiet && !level.always() {
            return;
        }
        let suffix = event_id
            .map(|id| format!(" {}", format!("(event {})", id).bright_black()))
            .unwrap_or_default();
        let prefix = if step.is_empty() {
            String::new()
        } else {
            format!("{} ", format!("[{}]", step).bright_magenta())
        };
        let body = match level {
            Level::Success => format!("{} {}", "✔".bright_green(), msg.green()),
            Level::Info => format!("{} {}", "•".cyan(), msg),
            Level::Warning => format!("{} {}", "⚠".bright_yellow(), msg.yellow()),
            Level::Error => format!("{} {}", "✘".bright_red(), msg.red().bold()),
            Level::Log => msg.bright_black().to_string(),
        };
        println!("{}{}{}", prefix, body, suffix);
    }

    fn step(&self, name: &str, description: &str) {
        *self.step.borrow_mut() = name.to_string();
        self.buffer.push(format!("=== {} ===", name));
        println!();
        tui::print_box(description, name, BoxStyle::Info);
    }

    fn progress_start(&self, label: &str, total: usize) {
        if !self.quiet {
            println!("{} {} ({} items)", "▸".bright_cyan(), label, total);
        }
    }

    fn progress_tick(&self) {}

    fn progress_end(&self) {}

    fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    fn wait_for_input(&self) {
        print!("{}", "Press ENTER to continue... ".bright_yellow());
        let _ = io::stdout().flush();
        let _ = io::stdin().lock().read_line(&mut String::new());
    }
}

/// Interactive dashboard with a progress bar per long iteration.
pub struct DashboardLogger {
    verbose: bool,
    step: RefCell<String>,
    bar: RefCell<Option<ProgressBar>>,
    buffer: LogBuffer,
}

impl DashboardLogger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            step: RefCell::new(String::new()),
            bar: RefCell::new(None),
            buffer: LogBuffer::default(),
        }
    }

    fn print(&self, line: &str) {
        match self.bar.borrow().as_ref() {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }
}

fn styled_progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template(
            " {spinner:.cyan} {msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

impl MigrationLogger for DashboardLogger {
    fn emit(&self, level: Level, msg: &str, event_id: Option<&str>) {
        let step = self.step.borrow().clone();
        self.buffer.push(plain_line(&step, level, msg, event_id));
        trace(level, &step, msg, event_id);
        if !self.verbose && !level.always() && level != Level::Success {
            return;
        }
        let suffix = event_id.map(|id| format!(" (event {})", id)).unwrap_or_default();
        let line = match level {
            Level::Success => format!("{} {}{}", "✔".bright_green(), msg, suffix),
            Level::Info | Level::Log => format!("{} {}{}", "•".cyan(), msg, suffix.bright_black()),
            Level::Warning => format!("{} {}{}", "⚠".bright_yellow(), msg.yellow(), suffix),
            Level::Error => format!("{} {}{}", "✘".bright_red(), msg.red().bold(), suffix),
        };
        self.print(&line);
    }

    fn step(&self, name: &str, description: &str) {
        *self.step.borrow_mut() = name.to_string();
        self.buffer.push(format!("=== {} ===", name));
        for line in tui::render_box(description, name, BoxStyle::Info) {
            self.print(&line);
        }
    }

    fn progress_start(&self, label: &str, total: usize) {
        let bar = styled_progress_bar(total as u64);
        bar.set_message(label.to_string());
        if let Some(old) = self.bar.replace(Some(bar)) {
            old.finish_and_clear();
        }
    }

    fn progress_tick(&self) {
        if let Some(bar) = self.bar.borrow().as_ref() {
            bar.inc(1);
        }
    }

    fn progress_end(&self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    fn wait_for_input(&self) {
        self.progress_end();
        print!("{}", "Press ENTER to continue... ".bright_yellow());
        let _ = io::stdout().flush();
        let _ = io::stdin().lock().read_line(&mut String::new());
    }
}

/// Keeps every message in memory. Used by tests to assert on warnings.
#[derive(Default)]
pub struct RecordingLogger {
    records: RefCell<Vec<(Level, String, Option<String>)>>,
    buffer: LogBuffer,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .filter(|(l, _, _)| *l == level)
            .map(|(_, m, _)| m.clone())
            .collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages(level).iter().any(|m| m.contains(needle))
    }
}

impl MigrationLogger for RecordingLogger {
    fn emit(&self, level: Level, msg: &str, event_id: Option<&str>) {
        self.buffer.push(plain_line("", level, msg, event_id));
        self.records
            .borrow_mut()
            .push((level, msg.to_string(), event_id.map(str::to_string)));
    }

    fn step(&self, name: &str, _description: &str) {
        self.buffer.push(format!("=== {} ===", name));
    }

    fn progress_start(&self, _label: &str, _total: usize) {}

    fn progress_tick(&self) {}

    fn progress_end(&self) {}

    fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }
}
