/// Exit classification: turns how a child terminated, whether the watchdog
/// tripped, and what it printed into a single outcome.
use crate::collector::CollectedOutput;
use crate::decode::DecodeError;
use crate::error::ExecError;
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

const SUCCESS_EXIT_CODE: i32 = 0;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own and reported a code.
    Exited(i32),
    /// No exit code: terminated by a signal (the signal number, when known).
    Signaled(Option<i32>),
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Termination::Exited(code),
            None => Termination::Signaled(exit_signal(&status)),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Successful execution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput<T> {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub parsed_stdout: T,
}

/// Classify a finished run.
///
/// Signal termination is checked first and never decodes; the timeout flag
/// only matters when a signal was observed. Otherwise stdout is decoded once,
/// and a decode failure short-circuits as an uncaught fault.
pub fn classify<T, F>(
    termination: Termination,
    timed_out: bool,
    read_timeout: Duration,
    output: CollectedOutput,
    decode: F,
) -> Result<ExecOutput<T>, ExecError<T>>
where
    T: fmt::Debug,
    F: FnOnce(&[u8]) -> Result<T, DecodeError>,
{
    let exit_code = match termination {
        Termination::Signaled(_) if timed_out => {
            return Err(ExecError::ReadTimeout {
                timeout: read_timeout,
            });
        }
        Termination::Signaled(signal) => return Err(ExecError::Signaled { signal }),
        Termination::Exited(code) => code,
    };

    let parsed_stdout = decode(&output.stdout).map_err(ExecError::from_decode)?;

    if exit_code != SUCCESS_EXIT_CODE {
        return Err(ExecError::NonZeroExit {
            exit_code,
            parsed_stdout,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    Ok(ExecOutput {
        exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        parsed_stdout,
    })
}
