//! Locating the container runtime daemon's log.
//!
//! Where the daemon logs depends on the host distribution; only the
//! file-based locations are probed, in priority order.

use std::path::{Path, PathBuf};

/// Default number of trailing lines surfaced.
pub const DEFAULT_TAIL_LINES: usize = 100;

/// One place the daemon log may live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCandidate {
    pub path: PathBuf,
    /// Keep only lines containing this substring (shared system logs).
    pub filter: Option<String>,
}

impl LogCandidate {
    pub fn new(path: impl Into<PathBuf>, filter: Option<&str>) -> Self {
        Self {
            path: path.into(),
            filter: filter.map(str::to_string),
        }
    }
}

/// Result of probing for the daemon log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonLog {
    /// The log was found and its (filtered) tail read.
    Found { path: PathBuf, lines: Vec<String> },
    /// A candidate exists but could not be read.
    Unreadable(PathBuf),
    /// None of the candidates exist on this host.
    Unsupported,
}

impl DaemonLog {
    /// Lines to surface, empty unless found.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            DaemonLog::Found { lines, .. } => lines,
            _ => Vec::new(),
        }
    }
}

/// Lookup table of daemon log locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonLogProbe {
    pub candidates: Vec<LogCandidate>,
    pub lines: usize,
}

impl Default for DaemonLogProbe {
    fn default() -> Self {
        Self {
            candidates: vec![
                LogCandidate::new("/var/log/upstart/docker.log", None),
                LogCandidate::new("/var/log/daemon.log", Some("docker")),
                LogCandidate::new("/var/log/messages", Some("docker")),
            ],
            lines: DEFAULT_TAIL_LINES,
        }
    }
}

impl DaemonLogProbe {
    /// Find the first existing candidate and read its tail.
    pub async fn probe(&self) -> DaemonLog {
        for candidate in &self.candidates {
            if !tokio::fs::try_exists(&candidate.path).await.unwrap_or(false) {
                continue;
            }
            tracing::debug!(
                path = %candidate.path.display(),
                filter = ?candidate.filter,
                "Found daemon log"
            );
            let filter = candidate.filter.as_deref();
            return match tail_filtered(&candidate.path, filter, self.lines).await {
                Ok(lines) => DaemonLog::Found {
                    path: candidate.path.clone(),
                    lines,
                },
                Err(e) => {
                    tracing::error!(
                        path = %candidate.path.display(),
                        error = %e,
                        "Daemon log not readable"
                    );
                    DaemonLog::Unreadable(candidate.path.clone())
                }
            };
        }
        tracing::error!("No known daemon log location on this platform");
        DaemonLog::Unsupported
    }

    /// Probe and report the tail through `tracing` at error level.
    pub async fn dump(&self) -> Vec<String> {
        let lines = self.probe().await.into_lines();
        if !lines.is_empty() {
            tracing::debug!(count = lines.len(), "Printing daemon log tail");
        }
        for line in &lines {
            tracing::error!(target: "vsinet_env::daemon_log", "{line}");
        }
        lines
    }
}

/// Last `n` lines of `path`, optionally keeping only lines containing `filter`.
pub async fn tail_filtered(
    path: &Path,
    filter: Option<&str>,
    n: usize,
) -> std::io::Result<Vec<String>> {
    let bytes = tokio::fs::read(path).await?;
    let text = String::from_utf8_lossy(&bytes);
    let matching: Vec<&str> = text
        .lines()
        .filter(|l| filter.map_or(true, |f| l.contains(f)))
        .collect();
    let start = matching.len().saturating_sub(n);
    Ok(matching[start..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_lines(path: &Path, count: usize, tag: impl Fn(usize) -> &'static str) {
        let body: String = (0..count)
            .map(|i| format!("{} line {i}\n", tag(i)))
            .collect();
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let probe = DaemonLogProbe {
            candidates: vec![LogCandidate::new(dir.path().join("nope.log"), None)],
            lines: 10,
        };
        assert_eq!(probe.probe().await, DaemonLog::Unsupported);
    }

    #[tokio::test]
    async fn test_first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("daemon.log");
        let third = dir.path().join("messages");
        write_lines(&second, 5, |_| "docker");
        write_lines(&third, 5, |_| "docker");

        let probe = DaemonLogProbe {
            candidates: vec![
                LogCandidate::new(dir.path().join("upstart.log"), None),
                LogCandidate::new(&second, Some("docker")),
                LogCandidate::new(&third, Some("docker")),
            ],
            lines: 100,
        };
        match probe.probe().await {
            DaemonLog::Found { path, lines } => {
                assert_eq!(path, second);
                assert_eq!(lines.len(), 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_filter_then_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("messages");
        write_lines(&log, 300, |i| if i % 2 == 0 { "docker" } else { "kernel" });

        let lines = tail_filtered(&log, Some("docker"), 100).await.unwrap();
        assert_eq!(lines.len(), 100);
        assert!(lines.iter().all(|l| l.starts_with("docker")));
        assert_eq!(lines.last().unwrap(), "docker line 298");
    }

    #[tokio::test]
    async fn test_unfiltered_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("docker.log");
        write_lines(&log, 3, |_| "x");
        let lines = tail_filtered(&log, None, 100).await.unwrap();
        assert_eq!(lines, vec!["x line 0", "x line 1", "x line 2"]);
    }
}
