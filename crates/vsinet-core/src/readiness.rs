//! Firmware readiness script and status parsing.

use serde::Serialize;

/// File name of the readiness script inside the shared directory.
pub const READINESS_SCRIPT_NAME: &str = "wait_for_firmware";

/// Shell script that waits for the firmware and writes a status line.
pub const READINESS_SCRIPT: &str = include_str!("../scripts/wait_for_firmware");

/// Outcome reported by the readiness script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    /// The named daemon never started
    ProcessNotRunning(String),
    /// The daemon runs but the hardware counter stayed at zero
    CounterStuck,
    /// A line we do not understand
    Unrecognized(String),
}

impl ReadinessStatus {
    /// Parse the first line of the status file.
    pub fn parse(first_line: &str) -> Self {
        let line = first_line.trim();
        if line == "Success" {
            return ReadinessStatus::Ready;
        }
        let Some(reason) = line.strip_prefix("Failure:").map(str::trim) else {
            return ReadinessStatus::Unrecognized(line.to_string());
        };
        if let Some(daemon) = reason.strip_suffix("not running") {
            return ReadinessStatus::ProcessNotRunning(daemon.trim().to_string());
        }
        if reason.contains("cur_hw") {
            return ReadinessStatus::CounterStuck;
        }
        ReadinessStatus::Unrecognized(line.to_string())
    }

    /// Parse a whole status file; `None` until the script has written a line.
    pub fn from_log(contents: &str) -> Option<Self> {
        contents
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(Self::parse)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessStatus::Ready)
    }
}
