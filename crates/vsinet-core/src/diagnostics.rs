//! Failure diagnostics for nodes that did not boot.
//!
//! Everything lands in the node's shared directory so it is visible both
//! on the host and inside the environment:
//!
//! ```text
//! <node_dir>/shared/
//! ├── logs        status line from the readiness script + appended report
//! ├── syslog      firmware lines from the host syslog
//! ├── boot.json   machine-readable boot result
//! └── coredump/   copied from inside the environment, if any
//! ```

use crate::boot::BootResult;
use crate::error::Result;
use crate::kind::SwitchOptions;
use chrono::Utc;
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use vsinet_env::{Environment, SHARED_MOUNT_POINT};

/// Report file in the shared directory.
pub const DIAGNOSTICS_FILE: &str = "logs";

const SYSLOG_FILE: &str = "syslog";
const RESULT_FILE: &str = "boot.json";
const SYSLOG_TAIL_LINES: usize = 200;

/// Collect diagnostics for a failed boot and return the report path.
///
/// Each source is best-effort; a source that cannot be read is noted in
/// the report instead of failing the collection.
pub async fn collect(
    env: &Environment,
    opts: &SwitchOptions,
    result: &BootResult,
) -> Result<PathBuf> {
    let start = std::time::Instant::now();
    let shared = env.shared_dir();
    let path = shared.join(DIAGNOSTICS_FILE);
    tracing::info!(env_id = %env.id(), result = %result, "Collecting diagnostics");

    let mut report = String::new();
    section(&mut report, "boot failure");
    let _ = writeln!(report, "Environment: {}", env.id());
    let _ = writeln!(report, "Result: {result}");

    section(&mut report, "environments");
    match vsinet_env::list_all(env.runner().as_ref(), &env.config().runtime).await {
        Ok(ps) => report.push_str(&ps),
        Err(e) => {
            let _ = writeln!(report, "unavailable: {e}");
        }
    }

    section(&mut report, "environment logs");
    match env.logs().await {
        Ok(logs) => report.push_str(&logs),
        Err(e) => {
            let _ = writeln!(report, "unavailable: {e}");
        }
    }

    section(&mut report, &format!("{} syslog", opts.firmware_process));
    let syslog = vsinet_env::tail_filtered(
        &opts.syslog_path,
        Some(opts.firmware_process.as_str()),
        SYSLOG_TAIL_LINES,
    )
    .await;
    match &syslog {
        Ok(lines) => {
            for line in lines {
                report.push_str(line);
                report.push('\n');
            }
        }
        Err(e) => {
            let _ = writeln!(report, "unavailable ({}): {e}", opts.syslog_path.display());
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(report.as_bytes()).await?;
    file.flush().await?;

    if let Ok(lines) = syslog {
        tokio::fs::write(shared.join(SYSLOG_FILE), lines.join("\n")).await?;
    }
    tokio::fs::write(shared.join(RESULT_FILE), serde_json::to_vec_pretty(result)?).await?;

    let copy = format!(
        "cp -rf {} {SHARED_MOUNT_POINT}/coredump",
        opts.coredump_dir.display()
    );
    match env.run(&copy).await {
        Ok(out) if out.success() => {}
        Ok(out) => {
            tracing::debug!(env_id = %env.id(), output = %out.output.trim(), "No coredumps copied")
        }
        Err(e) => tracing::warn!(env_id = %env.id(), error = %e, "Coredump copy failed"),
    }

    tracing::info!(
        env_id = %env.id(),
        path = %path.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Diagnostics collected"
    );
    Ok(path)
}

fn section(report: &mut String, title: &str) {
    let _ = writeln!(report, "\n==== {} {title} ====", Utc::now().to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::FirmwareFailure;
    use std::sync::Arc;
    use vsinet_env::mock::{MockRunner, Reply};
    use vsinet_env::{EnvironmentBuilder, PollPolicy};

    async fn env(dir: &std::path::Path, runner: Arc<MockRunner>) -> Environment {
        EnvironmentBuilder::new("t1-s1", "switch:latest")
            .node_dir(dir.join("s1"))
            .start_poll(PollPolicy::unbounded(std::time::Duration::from_millis(1)))
            .build(runner)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bundle_written_even_when_sources_missing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::with_handler(|argv| match argv[1].as_str() {
            "ps" => Reply::ok("CONTAINER ID   NAMES\nabc   t1-s1\n"),
            "logs" => Reply::ok("switchd: segfault\n"),
            "exec" => Reply::output(1, "cp: cannot stat"),
            _ => MockRunner::default_reply(argv),
        }));
        let env = env(dir.path(), runner.clone()).await;
        let opts = SwitchOptions {
            syslog_path: dir.path().join("absent-syslog"),
            ..Default::default()
        };
        let result = BootResult::FirmwareFailed {
            failure: FirmwareFailure::ProcessNotRunning("switchd".into()),
        };

        let path = collect(&env, &opts, &result).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert!(text.contains("Environment: t1-s1"));
        assert!(text.contains("abc   t1-s1"));
        assert!(text.contains("switchd: segfault"));
        assert!(text.contains("unavailable"));
        assert!(env.shared_dir().join(RESULT_FILE).exists());
        assert_eq!(runner.calls_matching("cp -rf /var/lib/systemd/coredump").len(), 1);
    }

    #[tokio::test]
    async fn test_appends_after_status_line_and_filters_syslog() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let env = env(dir.path(), runner).await;
        let status = env.shared_dir().join(DIAGNOSTICS_FILE);
        std::fs::write(status, "Failure: cur_hw not incremented\n").unwrap();

        let syslog = dir.path().join("syslog");
        std::fs::write(&syslog, "kernel: eth0 up\nswitchd[12]: init failed\ncron: tick\n").unwrap();
        let opts = SwitchOptions {
            syslog_path: syslog,
            ..Default::default()
        };

        let result = BootResult::FirmwareFailed {
            failure: FirmwareFailure::CounterStuck,
        };
        let path = collect(&env, &opts, &result).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();

        assert!(text.starts_with("Failure: cur_hw not incremented\n"));
        let copied = std::fs::read_to_string(env.shared_dir().join(SYSLOG_FILE)).unwrap();
        assert_eq!(copied, "switchd[12]: init failed");
    }
}
