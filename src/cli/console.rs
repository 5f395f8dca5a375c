use colored::*;
use std::io::{self, Write};

use crate::runner::RunResult;
use crate::traces::{Span, SpanKind, SpanStatus, Trace, TraceStatus};

/// Console handles all terminal output with colored formatting
pub struct Console {
    user_color: Color,
    assistant_color: Color,
    handoff_color: Color,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Create a new Console with default colors
    pub fn new() -> Self {
        Self {
            user_color: Color::Cyan,
            assistant_color: Color::Green,
            handoff_color: Color::Magenta,
        }
    }

    /// Create a new Console with custom colors
    pub fn with_colors(user_color: Color, assistant_color: Color, handoff_color: Color) -> Self {
        Self {
            user_color,
            assistant_color,
            handoff_color,
        }
    }

    /// Print a welcome banner
    pub fn print_banner(&self, workflow: &str) {
        println!("{}", "=".repeat(60).bright_blue());
        println!("{}", format!("  {}", workflow).bright_blue().bold());
        println!("{}", "=".repeat(60).bright_blue());
        println!();
    }

    /// Print a user message with colored formatting
    pub fn print_user(&self, message: &str) {
        println!("{} {}", "User:".color(self.user_color).bold(), message);
    }

    /// Print an agent name prefix (without newline)
    pub fn print_agent_prefix(&self, agent: &str) {
        print!("{} ", format!("{}:", agent).color(self.assistant_color).bold());
        let _ = io::stdout().flush();
    }

    /// Print a chunk of streamed output
    pub fn print_chunk(&self, chunk: &str) {
        print!("{}", chunk.color(self.assistant_color));
        let _ = io::stdout().flush();
    }

    /// Print a complete agent message
    pub fn print_agent(&self, agent: &str, message: &str) {
        println!(
            "{} {}",
            format!("{}:", agent).color(self.assistant_color).bold(),
            message.color(self.assistant_color)
        );
    }

    /// Print a handoff between agents
    pub fn print_handoff(&self, from: &str, to: &str, reason: Option<&str>) {
        let reason = reason.map(|r| format!(" ({})", r)).unwrap_or_default();
        println!(
            "{} {} -> {}{}",
            "Handoff:".color(self.handoff_color).bold(),
            from,
            to,
            reason.bright_black()
        );
    }

    /// Print a newline
    pub fn println(&self) {
        println!();
    }

    /// Print a system message
    pub fn print_system(&self, message: &str) {
        println!("{} {}", "System:".yellow().bold(), message);
    }

    /// Print an error message
    pub fn print_error(&self, error: &str) {
        eprintln!("{} {}", "Error:".red().bold(), error);
    }

    /// Print a separator line
    pub fn print_separator(&self) {
        println!("{}", "-".repeat(60).bright_black());
    }

    /// Print the outcome of a run
    pub fn print_result(&self, result: &RunResult) {
        self.print_separator();
        if result.success {
            println!("{} {}", "Result:".green().bold(), "success".green());
        } else {
            println!(
                "{} {}",
                "Result:".red().bold(),
                result.error.as_deref().unwrap_or("unknown error").red()
            );
        }
        println!(
            "  path: {}",
            result.metadata.handoff_path.join(" -> ").bold()
        );
        println!(
            "  turns: {}{}",
            result.metadata.turns,
            if result.metadata.truncated {
                " (turn budget exhausted)".yellow().to_string()
            } else {
                String::new()
            }
        );
        println!("  time: {}ms", result.metadata.execution_time_ms);
        if let Some(trace_id) = &result.metadata.trace_id {
            println!("  trace: {}", trace_id.bright_black());
        }
    }

    /// Print a recorded trace as an indented span list
    pub fn print_trace(&self, trace: &Trace) {
        self.print_separator();
        let status = match trace.status {
            TraceStatus::Running => "running".yellow(),
            TraceStatus::Completed => "completed".green(),
            TraceStatus::Error => "error".red(),
        };
        println!(
            "{} {} [{}]",
            "Trace:".bright_blue().bold(),
            trace.workflow_name,
            status
        );
        if let Some(ms) = trace.duration_ms() {
            println!("  duration: {}ms", ms);
        }

        for span in &trace.spans {
            let indent = if span.parent_id.is_some() { "    " } else { "  " };
            println!("{}{}", indent, self.format_span(span));
        }
    }

    /// One-line summary of a span
    pub fn format_span(&self, span: &Span) -> String {
        let marker = match span.status {
            SpanStatus::InProgress => "…".yellow(),
            SpanStatus::Completed => "✓".green(),
            SpanStatus::Error => "✗".red(),
        };
        let kind = format!("[{}]", span.kind).color(match span.kind {
            SpanKind::Handoff => self.handoff_color,
            _ => self.assistant_color,
        });
        let elapsed = span
            .ended_at
            .map(|end| format!(" {}ms", (end - span.started_at).num_milliseconds()))
            .unwrap_or_default();

        format!("{} {} {}{}", marker, kind, span.name, elapsed.bright_black())
    }
}
