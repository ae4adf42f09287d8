//! External command helper used by the renderers and the spool submitter.
//! （供頁面轉檔與送印使用的外部指令幫手。）
//!
//! Arguments are templates: `{name}` placeholders are substituted per call,
//! so the same configured command can be reused for every job.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that may surface while preparing or executing a command.
/// （準備或執行指令時有可能發生的錯誤。）
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to read process output: {0}")]
    Output(std::io::Error),
    #[error("failed to poll process status: {0}")]
    Poll(std::io::Error),
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("failed to terminate process: {0}")]
    Kill(std::io::Error),
    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Serializable command whose arguments may contain `{name}` placeholders.
/// （可序列化、參數可含 `{name}` 佔位符的指令設定。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout_ms: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Applies a timeout; the process is killed once it elapses.
    /// （設定逾時，逾時後強制終止進程。）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_millis().clamp(1, u128::from(u64::MAX)) as u64;
        self.timeout_ms = Some(millis);
        self
    }

    /// Arguments with every `{name}` in `vars` replaced by its value.
    /// Unknown placeholders are left untouched.
    pub fn expand(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }

    /// Runs the expanded command, failing on a non-zero exit status.
    /// （執行展開後的指令；結束碼非 0 時回傳錯誤。）
    pub fn run(&self, vars: &[(&str, &str)]) -> Result<CommandOutput, CommandError> {
        let args = self.expand(vars);
        debug!("Running {} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command.args(&args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Pipes are read on helper threads while the child runs.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.timeout_ms.map(Duration::from_millis) {
            Some(timeout) => loop {
                if let Some(status) = child.try_wait().map_err(CommandError::Poll)? {
                    break status;
                }
                if start.elapsed() >= timeout {
                    child.kill().map_err(CommandError::Kill)?;
                    let _ = child.wait();
                    return Err(CommandError::TimedOut {
                        program: self.program.clone(),
                        timeout,
                    });
                }
                thread::sleep(Duration::from_millis(15));
            },
            None => child.wait().map_err(CommandError::Output)?,
        };

        let result = CommandOutput {
            exit_code: status.code(),
            stdout: collect(stdout).map_err(CommandError::Output)?,
            stderr: collect(stderr).map_err(CommandError::Output)?,
            duration: start.elapsed(),
        };
        if !result.success() {
            return Err(CommandError::Failed {
                program: self.program.clone(),
                code: result.exit_code,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(result)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buffer)?;
        }
        Ok(buffer)
    })
}

fn collect(reader: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    reader
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "output reader panicked")))
}

/// Captured result of a finished command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}
