/*!
# Process Guard

Checks whether a process recorded by an earlier CI step is still alive and
asks it to shut down. Shutdown is best effort: failures are reported to the
caller and logged, never escalated.
*/

use std::fmt;
use std::str::FromStr;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use state_store::RunState;

/// Result type for process operations
pub type ProcessResult<T> = Result<T, ProcessError>;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Invalid pid: {raw:?}")]
    InvalidPid { raw: String },

    #[error("Failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: i32, reason: String },
}

/// Process id read from run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: i32,
}

impl ProcessHandle {
    /// Only positive pids are accepted; 0 and negatives address process groups
    pub fn new(pid: i32) -> ProcessResult<Self> {
        if pid <= 0 {
            return Err(ProcessError::InvalidPid {
                raw: pid.to_string(),
            });
        }
        Ok(Self { pid })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    fn as_nix(&self) -> Pid {
        Pid::from_raw(self.pid)
    }

    pub fn is_running(&self) -> bool {
        ProcessLiveness::is_running(self.as_nix())
    }

    pub fn terminate(&self) -> ProcessResult<()> {
        ProcessLiveness::terminate(self.as_nix())
    }
}

impl FromStr for ProcessHandle {
    type Err = ProcessError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let pid = raw.trim().parse::<i32>().map_err(|_| ProcessError::InvalidPid {
            raw: raw.to_string(),
        })?;
        Self::new(pid).map_err(|_| ProcessError::InvalidPid {
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pid)
    }
}

pub struct ProcessLiveness;

impl ProcessLiveness {
    /// Probe with signal 0.
    ///
    /// No such process and permission denied both read as "not running".
    pub fn is_running(pid: Pid) -> bool {
        match signal::kill(pid, None) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Liveness probe for {} failed: {}", pid, e);
                false
            }
        }
    }

    /// Send SIGTERM
    pub fn terminate(pid: Pid) -> ProcessResult<()> {
        signal::kill(pid, Signal::SIGTERM).map_err(|e| ProcessError::TerminationFailed {
            pid: pid.as_raw(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug)]
pub enum StopOutcome {
    NoRecordedPid,
    InvalidPid(String),
    NotRunning(ProcessHandle),
    Terminated(ProcessHandle),
    Failed(ProcessHandle, ProcessError),
}

impl StopOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StopOutcome::Failed(..))
    }
}

/// Terminate the process whose pid is recorded under `key`, if it is still alive
pub fn stop_recorded_process(state: &dyn RunState, key: &str) -> StopOutcome {
    let Some(raw) = state.get_state(key) else {
        tracing::info!("No server pid recorded under {}", key);
        return StopOutcome::NoRecordedPid;
    };

    tracing::info!("Found server pid: {}", raw);
    let handle = match raw.parse::<ProcessHandle>() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!("Ignoring recorded server pid: {}", e);
            return StopOutcome::InvalidPid(raw);
        }
    };

    if !handle.is_running() {
        tracing::info!("Server with pid {} is not running", handle);
        return StopOutcome::NotRunning(handle);
    }

    tracing::info!("Killing server pid: {}", handle);
    match handle.terminate() {
        Ok(()) => StopOutcome::Terminated(handle),
        Err(e) => {
            tracing::error!("{}", e);
            StopOutcome::Failed(handle, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_store::StateStore;

    // Above the kernel's pid_max ceiling (2^22)
    const NEVER_A_PID: i32 = 4_194_305;

    #[test]
    fn test_own_process_is_running() {
        let handle = ProcessHandle::new(std::process::id() as i32).unwrap();
        assert!(handle.is_running());
    }

    #[test]
    fn test_missing_process_is_not_running() {
        let handle = ProcessHandle::new(NEVER_A_PID).unwrap();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_terminate_missing_process_fails() {
        let handle = ProcessHandle::new(NEVER_A_PID).unwrap();
        assert!(matches!(
            handle.terminate(),
            Err(ProcessError::TerminationFailed { pid: NEVER_A_PID, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_group_pids() {
        assert_eq!("  42\n".parse::<ProcessHandle>().unwrap().pid(), 42);
        assert!("0".parse::<ProcessHandle>().is_err());
        assert!("-1".parse::<ProcessHandle>().is_err());
        assert!("server".parse::<ProcessHandle>().is_err());
    }

    #[test]
    fn test_stop_without_recorded_pid() {
        let state = StateStore::new();
        assert!(matches!(
            stop_recorded_process(&state, "TURBO_LOCAL_SERVER_PID"),
            StopOutcome::NoRecordedPid
        ));
    }

    #[test]
    fn test_stop_with_garbage_pid() {
        let mut state = StateStore::new();
        state.set("TURBO_LOCAL_SERVER_PID", "not-a-pid").unwrap();
        assert!(matches!(
            stop_recorded_process(&state, "TURBO_LOCAL_SERVER_PID"),
            StopOutcome::InvalidPid(_)
        ));
    }

    #[test]
    fn test_stop_dead_process() {
        let mut state = StateStore::new();
        state
            .set("TURBO_LOCAL_SERVER_PID", NEVER_A_PID.to_string())
            .unwrap();
        let outcome = stop_recorded_process(&state, "TURBO_LOCAL_SERVER_PID");
        assert!(matches!(outcome, StopOutcome::NotRunning(_)));
        assert!(!outcome.is_failure());
    }
}
