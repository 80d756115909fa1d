//! Small process-related helpers shared across the workspace.
//!
//! External tools (downloaders, speech-to-text CLIs) are spawned through
//! [`tokio_command`] and driven to completion with [`run_captured`], which
//! streams stderr into the log and turns a non-zero exit into a
//! [`ProcessError`].

use std::ffi::OsStr;
use std::process::ExitStatus;

use thiserror::Error;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Failure of an external tool.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}{}", format_tail(.stderr_tail))]
    Exit {
        program: String,
        status: ExitStatus,
        stderr_tail: Vec<String>,
    },
}

fn format_tail(tail: &[String]) -> String {
    match tail.last() {
        Some(line) => format!(": {line}"),
        None => String::new(),
    }
}

/// Output of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    /// Everything the process wrote to stdout.
    pub stdout: String,
    /// The last lines the process wrote to stderr.
    pub stderr_tail: Vec<String>,
}

/// Run a command to completion, capturing stdout and logging stderr.
///
/// `program` is only used as a label in logs and errors. A non-zero exit
/// status is reported as [`ProcessError::Exit`].
#[cfg(feature = "tokio")]
pub async fn run_captured(
    program: &str,
    mut cmd: tokio::process::Command,
) -> Result<CapturedOutput, ProcessError> {
    use std::collections::VecDeque;
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tracing::{debug, warn};

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, "Spawning external process");

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout_handle = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf).await;
            buf
        })
    });

    let label = program.to_string();
    let stderr_handle = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.contains("ERROR") || line.contains("error") {
                    warn!(program = %label, "stderr: {}", line);
                } else {
                    debug!(program = %label, "stderr: {}", line);
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>()
        })
    });

    let status = child.wait().await.map_err(|source| ProcessError::Wait {
        program: program.to_string(),
        source,
    })?;

    let stdout = match stdout_handle {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr_tail = match stderr_handle {
        Some(h) => h.await.unwrap_or_default(),
        None => Vec::new(),
    };

    if !status.success() {
        return Err(ProcessError::Exit {
            program: program.to_string(),
            status,
            stderr_tail,
        });
    }

    Ok(CapturedOutput {
        stdout,
        stderr_tail,
    })
}
