use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use sysexec::config::{DecoderKind, SysExecConfig};
use sysexec::{decode, execute, ExecError, ExecOptions, ExecOutput};
use tracing_subscriber::EnvFilter;

/// Exit code reported when the watchdog killed the child for inactivity.
const EXIT_READ_TIMEOUT: u8 = 124;
/// Exit code reported when the command could not be started.
const EXIT_SPAWN_FAILED: u8 = 127;

/// Run a command under supervision: capture its output, kill it if it goes
/// silent for too long, and report how it ended.
#[derive(Parser, Debug)]
#[command(name = "sysexec", version, about)]
pub struct Cli {
    /// Command to run (looked up on PATH, never passed through a shell)
    #[arg(value_name = "COMMAND")]
    command: String,

    /// Arguments passed verbatim to the command
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Config file path
    #[arg(short, long, default_value = "sysexec.toml")]
    config: PathBuf,

    /// Inactivity timeout in milliseconds; 0 or negative disables the watchdog (overrides config)
    #[arg(long, value_name = "MS", allow_negative_numbers = true)]
    read_timeout: Option<i64>,

    /// Don't spawn anything, just report an empty result (overrides config)
    #[arg(long)]
    quiet: bool,

    /// How to decode captured stdout (overrides config)
    #[arg(long, value_enum)]
    decoder: Option<DecoderKind>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (watchdog checks, stream activity)
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(long, conflicts_with = "verbose")]
    log_quiet: bool,
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.log_quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Merge CLI overrides on top of the file config.
fn resolve_config(cli: &Cli, mut config: SysExecConfig) -> SysExecConfig {
    if let Some(ms) = cli.read_timeout {
        config.exec.read_timeout_ms = ms;
    }
    if cli.quiet {
        config.exec.quiet = true;
    }
    if let Some(decoder) = cli.decoder {
        config.output.decoder = decoder;
    }
    config
}

/// Map a failed execution onto this process's exit code.
fn failure_exit_code<T: std::fmt::Debug>(err: &ExecError<T>) -> u8 {
    match err {
        ExecError::Spawn { .. } => EXIT_SPAWN_FAILED,
        ExecError::ReadTimeout { .. } => EXIT_READ_TIMEOUT,
        ExecError::Signaled { signal } => signal
            .and_then(|s| u8::try_from(128 + s).ok())
            .unwrap_or(1),
        ExecError::NonZeroExit { exit_code, .. } => u8::try_from(*exit_code).unwrap_or(1),
        ExecError::Uncaught { .. } => 1,
    }
}

fn write_streams(stdout: &[u8], stderr: &[u8]) {
    // Broken pipes on our own stdio are not worth failing the run over.
    let _ = std::io::stdout().write_all(stdout);
    let _ = std::io::stderr().write_all(stderr);
}

fn report_error<T: std::fmt::Debug>(err: &ExecError<T>) -> ExitCode {
    if let ExecError::NonZeroExit { stdout, stderr, .. } = err {
        write_streams(stdout, stderr);
    }
    let mut msg = format!("sysexec: {err}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        msg.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    eprintln!("{msg}");
    ExitCode::from(failure_exit_code(err))
}

async fn run<T, F>(cli: &Cli, opts: &ExecOptions, decode: F, render: fn(&T) -> Vec<u8>) -> ExitCode
where
    T: std::fmt::Debug,
    F: FnOnce(&[u8]) -> Result<T, sysexec::DecodeError>,
{
    match execute(&cli.command, &cli.args, decode, opts).await {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(ExecOutput {
            stderr,
            parsed_stdout,
            ..
        })) => {
            write_streams(&render(&parsed_stdout), &stderr);
            ExitCode::SUCCESS
        }
        Err(err) => report_error(&err),
    }
}

fn render_text(text: &String) -> Vec<u8> {
    text.as_bytes().to_vec()
}

fn render_json(value: &serde_json::Value) -> Vec<u8> {
    let mut out = serde_json::to_vec_pretty(value).unwrap_or_default();
    out.push(b'\n');
    out
}

fn render_raw(bytes: &Vec<u8>) -> Vec<u8> {
    bytes.clone()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    tracing::debug!(?cli, "parsed CLI arguments");

    let file_config = match SysExecConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("sysexec: {e}");
            return ExitCode::from(2);
        }
    };
    let config = resolve_config(&cli, file_config);

    if cli.dry_run {
        println!("sysexec v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!("Command: {} {:?}", cli.command, cli.args);
        println!("Quiet: {}", config.exec.quiet);
        match config.exec.read_timeout() {
            Some(t) => println!("Read timeout: {}ms", t.as_millis()),
            None => println!("Read timeout: disabled"),
        }
        println!("Decoder: {:?}", config.output.decoder);
        return ExitCode::SUCCESS;
    }

    let opts = &config.exec;
    match config.output.decoder {
        DecoderKind::Text => run(&cli, opts, decode::plain_text, render_text).await,
        DecoderKind::Json => run(&cli, opts, decode::json::<serde_json::Value>, render_json).await,
        DecoderKind::Raw => run(&cli, opts, decode::raw, render_raw).await,
    }
}
