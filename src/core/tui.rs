use colored::{ColoredString, Colorize};
use std::env;

const MIN_BOX_WIDTH: usize = 40;
const MAX_BOX_WIDTH: usize = 60;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoxStyle {
    Info,
    Success,
    Warning,
    Error,
}

/// Lifecycle state of a pipeline step, as shown in summaries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StepStatus::Pending => "·",
            StepStatus::Running => "▸",
            StepStatus::Completed => "✔",
            StepStatus::Skipped => "⏭",
            StepStatus::Failed => "✘",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        }
    }

    fn paint(&self, s: &str) -> ColoredString {
        match self {
            StepStatus::Pending => s.bright_black(),
            StepStatus::Running => s.bright_cyan(),
            StepStatus::Completed => s.bright_green(),
            StepStatus::Skipped => s.yellow(),
            StepStatus::Failed => s.bright_red(),
        }
    }
}

pub fn terminal_width() -> usize {
    env::var("TERM_WIDTH")
        .ok()
        .and_then(|w| w.parse().ok())
        .or_else(|| env::var("COLUMNS").ok().and_then(|c| c.parse().ok()))
        .unwrap_or(80)
}

fn effective_width() -> usize {
    terminal_width().clamp(MIN_BOX_WIDTH, MAX_BOX_WIDTH)
}

pub fn box_top(width: usize) -> String {
    format!("╔{}╗", "═".repeat(width.saturating_sub(2)))
}

pub fn box_bottom(width: usize) -> String {
    format!("╚{}╝", "═".repeat(width.saturating_sub(2)))
}

pub fn box_row(left: &str, content: &str, right: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(2).saturating_sub(content_len);
    let left_pad = padding / 2;
    let right_pad = padding - left_pad;
    format!(
        "{}{}{}{}{}",
        left,
        " ".repeat(left_pad),
        content,
        " ".repeat(right_pad),
        right
    )
}

/// Lines of a centered title box. Returned rather than printed so progress
/// bars can print them without tearing.
pub fn render_box(title: &str, subtitle: &str, style: BoxStyle) -> Vec<String> {
    let width = effective_width();
    let paint = |s: String| -> ColoredString {
        match style {
            BoxStyle::Info => s.bright_cyan(),
            BoxStyle::Success => s.bright_green(),
            BoxStyle::Warning => s.bright_yellow(),
            BoxStyle::Error => s.bright_red(),
        }
    };
    let mut lines = vec![
        paint(box_top(width)).to_string(),
        paint(box_row("║", title, "║", width)).bold().to_string(),
    ];
    if !subtitle.is_empty() {
        lines.push(paint(box_row("║", subtitle, "║", width)).to_string());
    }
    lines.push(paint(box_bottom(width)).to_string());
    lines
}

pub fn print_box(title: &str, subtitle: &str, style: BoxStyle) {
    for line in render_box(title, subtitle, style) {
        println!("{}", line);
    }
}

pub fn status_line(name: &str, status: StepStatus) -> String {
    format!(
        "  {} {:<24} {}",
        status.paint(status.icon()),
        name.bright_white(),
        status.paint(status.label())
    )
}

pub fn print_step_summary(steps: &[(String, StepStatus)]) {
    println!();
    for (name, status) in steps {
        println!("{}", status_line(name, *status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_rows_are_padded_to_width() {
        let row = box_row("║", "users", "║", 20);
        assert_eq!(row.chars().count(), 20);
        assert!(row.contains("users"));
        assert_eq!(box_top(10).chars().count(), 10);
    }

    #[test]
    fn render_box_has_subtitle_line() {
        colored::control::set_override(false);
        let lines = render_box("Users", "step 2 of 7", BoxStyle::Info);
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("step 2 of 7"));
    }
}
