use crate::decode::DecodeError;
use std::fmt;
use std::time::Duration;

/// Boxed lower-level fault carried by [`ExecError::Uncaught`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tag identifying which kind of failure an execution ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Spawn,
    ReadTimeout,
    Signaled,
    NonZeroExit,
    Uncaught,
}

/// Sub-kind of an internal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The decoder rejected stdout as malformed input.
    Parser,
    /// Anything else: I/O while waiting, a failed reader task, a decoder
    /// rejecting well-formed input.
    Other,
}

/// Failure outcome of a supervised execution.
///
/// `T` is the decoded stdout type; it is only carried by
/// [`ExecError::NonZeroExit`], where decoding is still attempted.
#[derive(Debug, thiserror::Error)]
pub enum ExecError<T: fmt::Debug> {
    /// The OS could not start the process or did not hand back both pipes.
    #[error("failed to spawn '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// No stdout/stderr activity for longer than `timeout`; the watchdog
    /// killed the process.
    #[error("spawned process was killed due to read timeout ({}ms without output)", .timeout.as_millis())]
    ReadTimeout { timeout: Duration },

    /// The process was terminated by a signal the watchdog did not send.
    #[error("spawned process was killed due to external signal{}", signal_suffix(.signal))]
    Signaled { signal: Option<i32> },

    /// The process exited on its own with a non-zero code.
    #[error("spawned process returned non-success ({exit_code}) exit code")]
    NonZeroExit {
        exit_code: i32,
        parsed_stdout: T,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// Internal fault while decoding or finishing the execution.
    #[error("{}", uncaught_message(.kind))]
    Uncaught {
        kind: FaultKind,
        #[source]
        source: BoxError,
    },
}

fn signal_suffix(signal: &Option<i32>) -> String {
    match signal {
        Some(sig) => format!(" ({sig})"),
        None => String::new(),
    }
}

fn uncaught_message(kind: &FaultKind) -> &'static str {
    match kind {
        FaultKind::Parser => "uncaught exception (probably parser has failed)",
        FaultKind::Other => "uncaught exception",
    }
}

impl<T: fmt::Debug> ExecError<T> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Spawn { .. } => ErrorKind::Spawn,
            ExecError::ReadTimeout { .. } => ErrorKind::ReadTimeout,
            ExecError::Signaled { .. } => ErrorKind::Signaled,
            ExecError::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            ExecError::Uncaught { .. } => ErrorKind::Uncaught,
        }
    }

    /// Wrap a decoder failure, classifying malformed input as a parser fault.
    pub(crate) fn from_decode(err: DecodeError) -> Self {
        let kind = if err.is_malformed_input() {
            FaultKind::Parser
        } else {
            FaultKind::Other
        };
        ExecError::Uncaught {
            kind,
            source: Box::new(err),
        }
    }

    pub(crate) fn uncaught(source: impl Into<BoxError>) -> Self {
        ExecError::Uncaught {
            kind: FaultKind::Other,
            source: source.into(),
        }
    }

    /// Exit code, when the process exited on its own with a failure code.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::NonZeroExit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn parsed_stdout(&self) -> Option<&T> {
        match self {
            ExecError::NonZeroExit { parsed_stdout, .. } => Some(parsed_stdout),
            _ => None,
        }
    }

    pub fn stdout(&self) -> Option<&[u8]> {
        match self {
            ExecError::NonZeroExit { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    pub fn stderr(&self) -> Option<&[u8]> {
        match self {
            ExecError::NonZeroExit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_read_timeout_message() {
        let err: ExecError<String> = ExecError::ReadTimeout {
            timeout: Duration::from_millis(3000),
        };
        assert_eq!(err.kind(), ErrorKind::ReadTimeout);
        assert_eq!(
            err.to_string(),
            "spawned process was killed due to read timeout (3000ms without output)"
        );
    }

    #[test]
    fn test_signaled_message_with_and_without_signal() {
        let err: ExecError<String> = ExecError::Signaled { signal: Some(15) };
        assert_eq!(
            err.to_string(),
            "spawned process was killed due to external signal (15)"
        );
        let err: ExecError<String> = ExecError::Signaled { signal: None };
        assert_eq!(
            err.to_string(),
            "spawned process was killed due to external signal"
        );
    }

    #[test]
    fn test_non_zero_exit_carries_details() {
        let err = ExecError::NonZeroExit {
            exit_code: 3,
            parsed_stdout: "partial".to_string(),
            stdout: b"partial".to_vec(),
            stderr: b"boom".to_vec(),
        };
        assert_eq!(err.kind(), ErrorKind::NonZeroExit);
        assert_eq!(
            err.to_string(),
            "spawned process returned non-success (3) exit code"
        );
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.parsed_stdout().map(String::as_str), Some("partial"));
        assert_eq!(err.stdout(), Some(&b"partial"[..]));
        assert_eq!(err.stderr(), Some(&b"boom"[..]));
    }

    #[test]
    fn test_details_absent_for_other_kinds() {
        let err: ExecError<String> = ExecError::Signaled { signal: Some(9) };
        assert_eq!(err.exit_code(), None);
        assert!(err.parsed_stdout().is_none());
        assert!(err.stdout().is_none());
        assert!(err.stderr().is_none());
    }

    #[test]
    fn test_from_decode_malformed_is_parser_fault() {
        let decode_err = serde_json::from_slice::<serde_json::Value>(b"{")
            .map_err(DecodeError::from)
            .unwrap_err();
        let err: ExecError<()> = ExecError::from_decode(decode_err);
        assert!(matches!(
            err,
            ExecError::Uncaught {
                kind: FaultKind::Parser,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "uncaught exception (probably parser has failed)"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_decode_custom_is_other_fault() {
        let err: ExecError<()> = ExecError::from_decode(DecodeError::custom("nope"));
        assert!(matches!(
            err,
            ExecError::Uncaught {
                kind: FaultKind::Other,
                ..
            }
        ));
        assert_eq!(err.to_string(), "uncaught exception");
        assert_eq!(err.source().map(|s| s.to_string()), Some("nope".to_string()));
    }

    #[test]
    fn test_spawn_error_wraps_io_error() {
        let err: ExecError<()> = ExecError::Spawn {
            command: "missing-bin".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.kind(), ErrorKind::Spawn);
        assert!(err.to_string().starts_with("failed to spawn 'missing-bin'"));
        assert!(err.source().is_some());
    }
}
