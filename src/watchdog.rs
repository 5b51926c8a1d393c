/// Inactivity monitor for a supervised child.
///
/// Runs alongside the child, checking the [`ActivityClock`] on a fixed tick.
/// If no output has arrived for longer than the read timeout, it flags the
/// run as timed out and sends SIGABRT to the child. The outcome itself is
/// decided later, when the child's exit is observed.
use crate::collector::ActivityClock;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Interval between inactivity checks.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(1000);

/// Signal sent to a child that stopped producing output.
pub const TIMEOUT_SIGNAL: Signal = Signal::SIGABRT;

pub struct InactivityWatchdog {
    read_timeout: Duration,
    check_interval: Duration,
}

impl InactivityWatchdog {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            check_interval: CHECK_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Start monitoring `pid`. The returned handle must be cancelled once the
    /// child has terminated.
    pub fn spawn(self, pid: u32, clock: Arc<ActivityClock>) -> WatchdogHandle {
        let token = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(monitor(
            self,
            pid,
            clock,
            token.clone(),
            Arc::clone(&timed_out),
        ));
        WatchdogHandle {
            token,
            timed_out,
            task: Some(task),
        }
    }
}

async fn monitor(
    watchdog: InactivityWatchdog,
    pid: u32,
    clock: Arc<ActivityClock>,
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(watchdog.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(pid, "watchdog cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let idle = clock.idle();
        tracing::trace!(pid, idle_ms = idle.as_millis() as u64, "watchdog check");
        if idle <= watchdog.read_timeout {
            continue;
        }

        if !timed_out.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                pid,
                idle_ms = idle.as_millis() as u64,
                read_timeout_ms = watchdog.read_timeout.as_millis() as u64,
                "no output from child within read timeout, sending SIGABRT"
            );
        }
        signal_child(pid);
    }
}

fn signal_child(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        tracing::error!(pid, "child pid out of range, cannot signal");
        return;
    };
    match kill(Pid::from_raw(raw), TIMEOUT_SIGNAL) {
        Ok(()) => {}
        Err(nix::errno::Errno::ESRCH) => {
            tracing::debug!(pid, "child already gone when watchdog fired");
        }
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed to signal child");
        }
    }
}

/// Owner's handle to a running watchdog.
///
/// Cancelling is idempotent; dropping the handle cancels too.
pub struct WatchdogHandle {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the watchdog flagged the child as stalled.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Cancel, wait for the monitor task to stop, and report whether it
    /// tripped. The flag cannot change after this returns.
    pub async fn shutdown(mut self) -> bool {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "watchdog task ended abnormally");
            }
        }
        self.timed_out()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_sleeper(secs: &str) -> tokio::process::Child {
        Command::new("sleep")
            .arg(secs)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_kills_idle_child_with_sigabrt() {
        let mut child = spawn_sleeper("30");
        let pid = child.id().unwrap();
        let handle = InactivityWatchdog::new(Duration::from_millis(100))
            .with_check_interval(Duration::from_millis(50))
            .spawn(pid, ActivityClock::start());

        let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.code(), None);
        assert_eq!(status.signal(), Some(TIMEOUT_SIGNAL as i32));
        assert!(handle.shutdown().await);
    }

    #[tokio::test]
    async fn test_does_not_fire_before_timeout() {
        let mut child = spawn_sleeper("0.3");
        let pid = child.id().unwrap();
        let handle = InactivityWatchdog::new(Duration::from_secs(30))
            .with_check_interval(Duration::from_millis(50))
            .spawn(pid, ActivityClock::start());

        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(0));
        assert!(!handle.shutdown().await);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut child = spawn_sleeper("0.1");
        let pid = child.id().unwrap();
        let handle =
            InactivityWatchdog::new(Duration::from_secs(5)).spawn(pid, ActivityClock::start());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        handle.cancel();

        child.wait().await.unwrap();
        assert!(!handle.shutdown().await);
    }

    #[tokio::test]
    async fn test_cancelled_watchdog_never_fires() {
        let mut child = spawn_sleeper("1");
        let pid = child.id().unwrap();
        let handle = InactivityWatchdog::new(Duration::from_millis(10))
            .with_check_interval(Duration::from_millis(200))
            .spawn(pid, ActivityClock::start());
        handle.cancel();

        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(0));
        assert!(!handle.timed_out());
    }
}
