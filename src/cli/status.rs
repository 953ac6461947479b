use std::io::{self, Write};
use std::time::Duration;

use crate::capability::CodecCapability;
use crate::error::{AppError, ErrorKind, ErrorSeverity};
use crate::format::Format;
use crate::logging::EventStatistics;
use crate::models::{format_duration, SessionStatus};
use crate::session::{InfoKind, SessionEvent};

/// Console output of the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Capability listing, one codec per line
    pub fn display_capabilities<'a>(codecs: impl IntoIterator<Item = &'a CodecCapability>) {
        let mut count = 0;
        for codec in codecs {
            println!("{}", codec.describe());
            count += 1;
        }
        if count == 0 {
            println!("No matching codecs");
        }
    }

    /// Full detail of a single codec
    pub fn display_capability(codec: &CodecCapability) {
        println!("┌─ {} ─────────────────────────────────────────┐", codec.name);
        println!("│ Kind: {}", codec.kind);
        println!("│ Mime: {}", codec.mime);
        if !codec.bitrate.is_unset() {
            println!("│ Bitrate: {} - {} bps", codec.bitrate.min, codec.bitrate.max);
        }
        if codec.media_type().has_video() {
            println!(
                "│ Size: {}x{} - {}x{}",
                codec.width.min, codec.height.min, codec.width.max, codec.height.max
            );
            let sizes: Vec<String> = codec
                .supported_sizes()
                .iter()
                .map(|(w, h)| format!("{}x{}", w, h))
                .collect();
            if !sizes.is_empty() {
                println!("│ Common sizes: {}", sizes.join(", "));
            }
        } else {
            println!("│ Channels: {} - {}", codec.channels.min, codec.channels.max);
            let rates: Vec<String> = codec.supported_sample_rates().iter().map(i64::to_string).collect();
            println!("│ Sample rates: {}", Self::truncate(&rates.join(", "), 60));
        }
        println!("└─────────────────────────────────────────────────────┘");
    }

    pub fn display_format(title: &str, format: &Format) {
        println!("{}:", title);
        for (key, value) in format.iter() {
            println!("  {:<20} {}", key, value);
        }
    }

    /// One line per session event, `None` for events not worth printing
    pub fn describe_event(event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::StateChanged { from, to } => Some(format!("state: {} -> {}", from, to)),
            SessionEvent::OutputFormatChanged(format) => Some(format!("output format: {}", format)),
            SessionEvent::Error(err) => Some(format!("error [{}]: {}", err.kind(), err)),
            SessionEvent::Info(InfoKind::PositionUpdate(_)) => None,
            SessionEvent::Info(info) => Some(format!("info: {}", info)),
            SessionEvent::InputAvailable { .. } | SessionEvent::OutputAvailable { .. } => None,
        }
    }

    pub fn display_event(event: &SessionEvent) {
        if let SessionEvent::Info(InfoKind::PositionUpdate(_)) = event {
            return;
        }
        if let Some(line) = Self::describe_event(event) {
            // keep the progress line from running into event output
            println!("\r{}", line);
        }
    }

    /// Single-line progress display, rewritten in place
    pub fn display_position_update(position: Duration, duration: Option<Duration>) {
        match duration.filter(|d| !d.is_zero()) {
            Some(duration) => {
                let progress = (position.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
                let bar_width = 30;
                let filled = (progress * bar_width as f64) as usize;
                let progress_bar = format!("{}{}", "█".repeat(filled), "░".repeat(bar_width - filled));
                print!(
                    "\r[{}] {}/{} ({:.1}%)",
                    progress_bar,
                    format_duration(position),
                    format_duration(duration),
                    progress * 100.0
                );
            }
            None => print!("\r{}", format_duration(position)),
        }
        let _ = io::stdout().flush();
    }

    pub fn display_session_status(status: &SessionStatus) {
        println!("┌─ Session {} ───────────────────────────────────┐", status.id.short());
        println!("│ Kind: {} ({})", status.kind, status.media_type);
        println!("│ State: {}", status.state);
        let buffers = &status.buffers;
        println!(
            "│ Inputs: {} granted, {} queued",
            buffers.inputs_granted, buffers.inputs_queued
        );
        println!(
            "│ Outputs: {} produced, {} released, {} rendered",
            buffers.outputs_produced, buffers.outputs_released, buffers.outputs_rendered
        );
        if let Some(err) = &status.last_error {
            println!("│ Last error: {}", Self::truncate(&err.to_string(), 50));
        }
        println!("└─────────────────────────────────────────────────────┘");
    }

    pub fn display_statistics(stats: &EventStatistics) {
        println!(
            "Sessions: {} created, {} transitions, {} cancellations, {} stalls, {} errors, {} slow operations",
            stats.sessions_created,
            stats.transitions,
            stats.cancellations,
            stats.backpressure_stalls,
            stats.session_errors,
            stats.performance_warnings
        );
    }

    /// Display error message with formatting and recovery suggestions
    pub fn display_error(error: &AppError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!(
            "┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon,
            severity.as_str()
        );
        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("│");
            eprintln!("│ Suggestions:");
            for suggestion in suggestions.iter().take(3) {
                for line in Self::wrap_text(&format!("• {}", suggestion), 53) {
                    eprintln!("│   {}", line);
                }
            }
        }

        Self::display_error_context(error);
        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    fn display_error_context(error: &AppError) {
        match error {
            AppError::Media(err) => {
                eprintln!("│");
                eprintln!("│ Code: {} ({})", err.ext_code(), err.kind());
                if err.kind() == ErrorKind::Unsupported {
                    eprintln!("│ Use 'caps' to list the available codecs");
                }
            }
            AppError::Config(_) => {
                eprintln!("│");
                eprintln!("│ Configuration will use default values");
            }
            _ => {}
        }
    }

    /// Plain error output for when formatting itself is not set up yet
    pub fn display_simple_error(error: &AppError) {
        eprintln!("Error: {}", error);
    }

    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + word.len() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(std::mem::take(&mut current_line));
                current_line = word.to_string();
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines
    }

    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}
