//! Build script execution.
//!
//! Scripts run through `/bin/sh -c` in the module's source tree with exactly
//! the variables of its [`BuildEnv`]. Output goes to a per-attempt log file;
//! on failure the tail of the log is folded into the error. The child is
//! polled with a short timeout so a cancelled run kills it promptly.

use anyhow::{Context, Result, bail};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::env::BuildEnv;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines of the log shown when a script fails.
const TAIL_LINES: usize = 20;
const TAIL_BYTES: u64 = 16 * 1024;

/// Run `script` in `cwd` with `env`, logging to `log_path`.
///
/// # Errors
///
/// Fails if the script cannot be spawned, exits non-zero, or `cancel` fires
/// while it runs (the child is killed first).
pub fn run_script(
    script: &str,
    cwd: &Path,
    env: &BuildEnv,
    log_path: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = File::create(log_path).context("Failed to create build log file")?;

    let mut cmd = Command::new("/bin/sh");
    env.apply(&mut cmd);
    cmd.arg("-c")
        .arg(script)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file));

    debug!("running build script in {}", cwd.display());
    let mut child = cmd.spawn().context("Failed to execute build script")?;

    let status = loop {
        if cancel.is_cancelled() {
            // The child may already have exited; either way reap it.
            let _ = child.kill();
            let _ = child.wait();
            bail!("Build script cancelled");
        }
        if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
            break status;
        }
    };

    if !status.success() {
        bail!("{}", failure_report(status, log_path));
    }
    Ok(())
}

/// Exit status, the tail of the log, and where the full log lives.
fn failure_report(status: ExitStatus, log_path: &Path) -> String {
    let mut report = match status.code() {
        Some(code) => format!("Build script exited with status {code}"),
        None => "Build script was killed by a signal".to_string(),
    };
    for line in log_tail(log_path).unwrap_or_default() {
        report.push('\n');
        report.push_str(&line);
    }
    let _ = write!(report, "\nFull log: {}", log_path.display());
    report
}

/// The last [`TAIL_LINES`] lines of the log. Only the final [`TAIL_BYTES`]
/// are read, so huge logs stay cheap.
fn log_tail(log_path: &Path) -> std::io::Result<VecDeque<String>> {
    let mut file = File::open(log_path)?;
    let start = file.metadata()?.len().saturating_sub(TAIL_BYTES);
    file.seek(SeekFrom::Start(start))?;

    let mut lines = BufReader::new(file).split(b'\n');
    if start > 0 {
        // Partial line.
        lines.next();
    }
    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    for line in lines {
        let line = line?;
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(String::from_utf8_lossy(&line).into_owned());
    }
    Ok(tail)
}
