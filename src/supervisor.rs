/// Single supervised execution: spawn the child, capture both streams, run
/// the inactivity watchdog, and classify the exit.
use crate::classify::{classify, ExecOutput, Termination};
use crate::collector::{ActivityClock, OutputCollector};
use crate::config::ExecOptions;
use crate::decode::{self, DecodeError};
use crate::error::ExecError;
use crate::watchdog::InactivityWatchdog;
use serde::de::DeserializeOwned;
use std::ffi::OsStr;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Run `command` with `args` (no shell) and decode its stdout with `decode`.
///
/// Returns `Ok(None)` without spawning anything when `options.quiet` is set.
/// Arguments are passed straight to the process; nothing is shell-expanded.
#[tracing::instrument(skip_all, fields(command = %command))]
pub async fn execute<T, F, I, S>(
    command: &str,
    args: I,
    decode: F,
    options: &ExecOptions,
) -> Result<Option<ExecOutput<T>>, ExecError<T>>
where
    T: fmt::Debug,
    F: FnOnce(&[u8]) -> Result<T, DecodeError>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    if options.quiet {
        tracing::debug!("quiet mode, not spawning");
        return Ok(None);
    }

    let args: Vec<S> = args.into_iter().collect();
    tracing::info!(
        args = ?args.iter().map(|a| a.as_ref().to_string_lossy()).collect::<Vec<_>>(),
        read_timeout_ms = options.read_timeout_ms,
        "spawning child process"
    );

    let start = Instant::now();

    let mut child = Command::new(command)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            tracing::error!(error = %e, "failed to spawn child process");
            ExecError::Spawn {
                command: command.to_string(),
                source: e,
            }
        })?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        tracing::error!("spawn returned no stdout/stderr handles");
        return Err(ExecError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other("spawn returned no stdout/stderr handles"),
        });
    };

    let pid = child.id().unwrap_or(0);
    tracing::info!(pid, "child process started");

    let clock = ActivityClock::start();
    let collector = OutputCollector::attach(stdout, stderr, clock.clone());
    let read_timeout = options.read_timeout();
    let watchdog = match (read_timeout, child.id()) {
        (Some(timeout), Some(pid)) => Some(InactivityWatchdog::new(timeout).spawn(pid, clock)),
        _ => None,
    };

    let status = child.wait().await;

    // Cancelled on every path, before anything is classified.
    let timed_out = match watchdog {
        Some(handle) => handle.shutdown().await,
        None => false,
    };

    let status = status.map_err(|e| {
        tracing::error!(pid, error = %e, "failed waiting for child process");
        ExecError::uncaught(e)
    })?;

    let output = collector.finish().await.map_err(|e| {
        tracing::error!(pid, error = %e, "failed collecting child output");
        ExecError::uncaught(e)
    })?;

    let termination = Termination::from(status);
    tracing::info!(
        pid,
        termination = ?termination,
        timed_out,
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "child process finished"
    );

    classify(
        termination,
        timed_out,
        read_timeout.unwrap_or(Duration::ZERO),
        output,
        decode,
    )
    .map(Some)
}

/// [`execute`] with the plain-text decoder.
pub async fn execute_text<I, S>(
    command: &str,
    args: I,
    options: &ExecOptions,
) -> Result<Option<ExecOutput<String>>, ExecError<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    execute(command, args, decode::plain_text, options).await
}

/// [`execute`] with the JSON decoder.
pub async fn execute_json<T, I, S>(
    command: &str,
    args: I,
    options: &ExecOptions,
) -> Result<Option<ExecOutput<T>>, ExecError<T>>
where
    T: DeserializeOwned + fmt::Debug,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    execute(command, args, decode::json::<T>, options).await
}
