use crate::command::Stage;
use crate::error::PipelineError;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::fmt;
use std::io::Write;
use tracing::{debug, trace, warn};

/// How a stage's process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Exited(i32),
    Signaled(Signal),
}

/// A forked stage that has not been collected yet.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    stage: Stage,
}

impl ProcessHandle {
    pub fn new(pid: Pid, stage: Stage) -> Self {
        ProcessHandle { pid, stage }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Blocks until the process terminates.
    pub fn wait(&self) -> Result<StageStatus, PipelineError> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(StageStatus::Exited(code)),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(StageStatus::Signaled(signal)),
                Ok(other) => trace!(?other, "process has not terminated yet"),
                Err(Errno::EINTR) => {}
                Err(source) => {
                    return Err(PipelineError::Wait {
                        pid: self.pid.as_raw(),
                        source,
                    })
                }
            }
        }
    }

    /// Kills the process and reaps it.
    pub fn terminate(self) {
        if let Err(errno) = kill(self.pid, Signal::SIGKILL) {
            warn!(pid = self.pid.as_raw(), %errno, "cannot kill process");
        }
        if let Err(error) = self.wait() {
            warn!(%error, "cannot reap killed process");
        }
    }
}

/// One line of the status report.
pub struct StatusReport<'a> {
    pub stage: &'a Stage,
    pub status: StageStatus,
}

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arguments = self.stage.display_arguments();
        match self.status {
            StageStatus::Exited(code) => write!(f, "{} exit status: {}", arguments, code),
            StageStatus::Signaled(_) => write!(f, "{} Signal Rec!", arguments),
        }
    }
}

/// Waits for each stage in stage order and writes its report line.
///
/// A failing wait or write stops reporting for the rest of the line; the
/// remaining stages are still waited for so none is left a zombie.
pub fn report_statuses<W: Write>(
    handles: Vec<ProcessHandle>,
    out: &mut W,
) -> Result<(), PipelineError> {
    let mut handles = handles.into_iter();
    while let Some(handle) = handles.next() {
        if let Err(error) = report_one(&handle, out) {
            for rest in handles.by_ref() {
                if let Err(error) = rest.wait() {
                    warn!(%error, "cannot reap stage");
                }
            }
            return Err(error);
        }
    }
    Ok(())
}

fn report_one<W: Write>(handle: &ProcessHandle, out: &mut W) -> Result<(), PipelineError> {
    let status = handle.wait()?;
    debug!(pid = handle.pid().as_raw(), ?status, "collected stage");
    let report = StatusReport {
        stage: handle.stage(),
        status,
    };
    writeln!(out, "{}", report).map_err(PipelineError::Report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::process::Command;

    fn stage(arguments: &[&str]) -> Stage {
        Stage {
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            input_redirect: None,
            output_redirect: None,
            has_upstream: false,
            has_downstream: false,
        }
    }

    fn spawned(arguments: &[&str]) -> ProcessHandle {
        let child = Command::new(arguments[0]).args(&arguments[1..]).spawn().unwrap();
        ProcessHandle::new(Pid::from_raw(child.id() as i32), stage(arguments))
    }

    #[test]
    fn report_line_for_exit() {
        let stage = stage(&["/bin/echo", "a", "b"]);
        let report = StatusReport {
            stage: &stage,
            status: StageStatus::Exited(2),
        };
        assert_eq!(report.to_string(), "/bin/echo a b exit status: 2");
    }

    #[test]
    fn report_line_for_signal() {
        let stage = stage(&["/bin/cat"]);
        let report = StatusReport {
            stage: &stage,
            status: StageStatus::Signaled(Signal::SIGPIPE),
        };
        assert_eq!(report.to_string(), "/bin/cat Signal Rec!");
    }

    #[test]
    fn wait_classifies_exit_code() {
        let handle = spawned(&["sh", "-c", "exit 7"]);
        assert_eq!(handle.wait().unwrap(), StageStatus::Exited(7));
    }

    #[test]
    fn wait_classifies_signal() {
        let handle = spawned(&["sh", "-c", "kill -TERM $$"]);
        assert_eq!(handle.wait().unwrap(), StageStatus::Signaled(Signal::SIGTERM));
    }

    #[test]
    fn waiting_twice_fails() {
        let handle = spawned(&["true"]);
        handle.wait().unwrap();
        assert_matches!(
            handle.wait(),
            Err(PipelineError::Wait { source: Errno::ECHILD, .. })
        );
    }

    #[test]
    fn terminate_kills_and_reaps() {
        let handle = spawned(&["sleep", "30"]);
        let pid = handle.pid();
        handle.terminate();
        assert_eq!(waitpid(pid, None), Err(Errno::ECHILD));
    }

    #[test]
    fn reports_follow_stage_order() {
        let handles = vec![
            spawned(&["sh", "-c", "sleep 0.2; exit 3"]),
            spawned(&["true"]),
        ];
        let mut out = Vec::new();
        report_statuses(handles, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "sh -c sleep 0.2; exit 3 exit status: 3\ntrue exit status: 0\n"
        );
    }

    #[test]
    fn wait_failure_stops_collection() {
        let reaped = spawned(&["true"]);
        reaped.wait().unwrap();
        let pending = spawned(&["true"]);
        let pending_pid = pending.pid();
        let handles = vec![reaped, pending];
        let mut out = Vec::new();
        assert_matches!(
            report_statuses(handles, &mut out),
            Err(PipelineError::Wait { .. })
        );
        assert!(out.is_empty());
        // the remaining stage was reaped anyway
        assert_eq!(waitpid(pending_pid, None), Err(Errno::ECHILD));
    }

    struct BrokenOutput;

    impl Write for BrokenOutput {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_still_reaps_every_stage() {
        let first = spawned(&["true"]);
        let second = spawned(&["sh", "-c", "exit 4"]);
        let pids = [first.pid(), second.pid()];
        assert_matches!(
            report_statuses(vec![first, second], &mut BrokenOutput),
            Err(PipelineError::Report(_))
        );
        for pid in pids {
            assert_eq!(waitpid(pid, None), Err(Errno::ECHILD));
        }
    }
}
