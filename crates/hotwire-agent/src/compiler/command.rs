//! Launching `javac` for one batch.
//!
//! javac reports diagnostics on stderr, and the launcher JVM adds its own
//! notices (`Picked up _JAVA_OPTIONS`) there too. Both streams are pointed at
//! one log file inside the batch's scratch directory, so the transcript keeps
//! the order javac wrote it in and nothing has to drain pipes while waiting.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const LOG_FILE: &str = "javac.log";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How one `javac` run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavacOutput {
    pub status: ExitStatus,
    /// Everything javac printed, as it printed it.
    pub log: String,
}

/// Runs `javac` with prepared arguments inside a batch scratch directory.
pub trait JavacLauncher: Send + Sync + std::fmt::Debug {
    fn launch(&self, javac: &Path, scratch: &Path, args: &[OsString]) -> io::Result<JavacOutput>;
}

/// Spawns `javac` as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    /// The child is killed once this passes. Processes javac itself spawned
    /// are not tracked.
    pub timeout: Option<Duration>,
}

impl JavacLauncher for ProcessLauncher {
    fn launch(&self, javac: &Path, scratch: &Path, args: &[OsString]) -> io::Result<JavacOutput> {
        let log_path = scratch.join(LOG_FILE);
        let log = File::create(&log_path)?;

        tracing::debug!(
            target: "hotwire.compiler",
            javac = %javac.display(),
            args = args.len(),
            "launching javac"
        );
        let mut child = Command::new(javac)
            .args(args)
            .current_dir(scratch)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()
            .map_err(|err| {
                io::Error::new(err.kind(), format!("failed to start {}: {err}", javac.display()))
            })?;

        let status = match self.timeout {
            None => child.wait(),
            Some(timeout) => wait_with_deadline(&mut child, timeout),
        };
        let status = match status {
            Ok(status) => status,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        let log = std::fs::read(&log_path)?;
        Ok(JavacOutput {
            status,
            log: String::from_utf8_lossy(&log).into_owned(),
        })
    }
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() >= timeout {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("javac timed out after {timeout:?}"),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
