//! Supervised execution of a single external process.
//!
//! [`execute`] spawns a command (argv only, never through a shell), captures
//! stdout and stderr, kills the child with SIGABRT if it stays silent longer
//! than the configured read timeout, and classifies the exit into a success
//! value or a typed [`ExecError`].

pub mod classify;
pub mod collector;
pub mod config;
pub mod decode;
pub mod error;
pub mod supervisor;
pub mod watchdog;

pub use classify::{ExecOutput, Termination};
pub use config::{ExecOptions, SysExecConfig};
pub use decode::DecodeError;
pub use error::{ErrorKind, ExecError, FaultKind};
pub use supervisor::{execute, execute_json, execute_text};
