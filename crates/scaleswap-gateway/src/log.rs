//! Execution log sink: per-command-unit lines streamed to operators.
//!
//! The sink is an explicit handle passed by reference into every
//! orchestrator call. Logging through it is fire-and-forget.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Status of the command unit a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Running,
    Success,
    Failure,
}

pub trait ExecutionLogSink: Send + Sync {
    fn log(&self, command_unit: &str, message: &str, level: LogLevel, status: CommandStatus);

    fn info(&self, command_unit: &str, message: &str) {
        self.log(command_unit, message, LogLevel::Info, CommandStatus::Running);
    }

    fn warn(&self, command_unit: &str, message: &str) {
        self.log(command_unit, message, LogLevel::Warn, CommandStatus::Running);
    }

    /// Close a command unit successfully.
    fn done(&self, command_unit: &str, message: &str) {
        self.log(command_unit, message, LogLevel::Info, CommandStatus::Success);
    }
}

/// Forwards execution log lines into `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingLogSink {
    activity_id: String,
}

impl TracingLogSink {
    pub fn new(activity_id: &str) -> Self {
        Self {
            activity_id: activity_id.to_string(),
        }
    }
}

impl ExecutionLogSink for TracingLogSink {
    fn log(&self, command_unit: &str, message: &str, level: LogLevel, status: CommandStatus) {
        match level {
            LogLevel::Info => info!(
                activity = %self.activity_id,
                unit = command_unit,
                ?status,
                "{message}"
            ),
            LogLevel::Warn => warn!(
                activity = %self.activity_id,
                unit = command_unit,
                ?status,
                "{message}"
            ),
            LogLevel::Error => error!(
                activity = %self.activity_id,
                unit = command_unit,
                ?status,
                "{message}"
            ),
        }
    }
}

/// One recorded log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub command_unit: String,
    pub message: String,
    pub level: LogLevel,
    pub status: CommandStatus,
}

/// Records every line in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().expect("log lock").clone()
    }

    /// Lines logged under one command unit.
    pub fn lines_for(&self, command_unit: &str) -> Vec<LogLine> {
        self.lines()
            .into_iter()
            .filter(|l| l.command_unit == command_unit)
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.message.contains(needle))
    }
}

impl ExecutionLogSink for MemoryLogSink {
    fn log(&self, command_unit: &str, message: &str, level: LogLevel, status: CommandStatus) {
        self.lines.lock().expect("log lock").push(LogLine {
            command_unit: command_unit.to_string(),
            message: message.to_string(),
            level,
            status,
        });
    }
}
