//! Dispatch log lines.
//!
//! ```text
//!       X_CORE ----- SET_VALUE -----> COUNTER | value: '5'
//! ```
//!
//! The sender is right-aligned and the target left-aligned in columns of
//! `id_maximum_logging_length`; the event id is centred in a column as wide as the longest
//! registered event id. Ids wider than their column are truncated.

use serde_json::Value;

use nodebus_core::LogLevel;

use crate::config::BusConfig;
use crate::record::{EventRecord, Origin, Target};
use crate::schema::{EventDescriptor, value_type_name};

pub const LOG_TARGET: &str = "nodebus::dispatch";

const BROADCAST_LABEL: &str = "BROADCAST";

/// Render the log line of `record`.
pub fn dispatch_line(
    record: &EventRecord,
    descriptor: &EventDescriptor,
    config: &BusConfig,
    event_width: usize,
) -> String {
    let width = config.id_maximum_logging_length;
    let event_width = event_width.min(width);

    let sender = truncate(record.sender().as_str(), width);
    let target = match record.target() {
        Target::Node(id) => truncate(id.as_str(), width),
        Target::Broadcast => BROADCAST_LABEL,
    };
    let event = truncate(record.event_id().as_str(), event_width);

    let remaining = event_width.saturating_sub(event.chars().count());
    let left = remaining / 2;
    let right = remaining - left;

    let mut line = format!(
        "{sender:>width$} --{} {event} {}-> {target:<width$}",
        "-".repeat(left),
        "-".repeat(right),
    );

    match record.origin() {
        Origin::Normal => {}
        Origin::Undo => line.push_str(" [undo]"),
        Origin::Redo => line.push_str(" [redo]"),
    }

    if config.log_event_parameters && !record.args().is_empty() {
        let parts: Vec<String> = record
            .args()
            .iter()
            .map(|arg| {
                let type_info = match descriptor.parameter(&arg.name).and_then(|p| p.kind()) {
                    Some(kind) if config.log_parameter_type_info => {
                        format!(" ({} / {})", kind.name(), value_type_name(&arg.value))
                    }
                    _ => String::new(),
                };
                format!("{}{type_info}: '{}'", arg.name, display_value(&arg.value))
            })
            .collect();
        line.push_str(" | ");
        line.push_str(&parts.join(" | "));
    }

    line.trim_end().to_string()
}

/// Emit `line` through `tracing` at `level`.
pub fn emit(level: LogLevel, line: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: LOG_TARGET, "{line}"),
        LogLevel::Debug => tracing::debug!(target: LOG_TARGET, "{line}"),
        LogLevel::Info => tracing::info!(target: LOG_TARGET, "{line}"),
        LogLevel::Warn => tracing::warn!(target: LOG_TARGET, "{line}"),
        LogLevel::Error => tracing::error!(target: LOG_TARGET, "{line}"),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
