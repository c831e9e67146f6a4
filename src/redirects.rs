//! Descriptor wiring inside a forked stage, up to the exec call.
//!
//! Everything a child needs is converted to C strings before the fork, so
//! the code that runs between fork and exec only issues system calls and,
//! on failure, writes one line to standard error.

use crate::command::Stage;
use crate::error::PipelineError;
use crate::pipes::Pipe;
use nix::errno::Errno;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::execvp;
use std::ffi::{CStr, CString};
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Exit status of a child that failed before its program could run.
pub const FAILURE_EXIT_CODE: i32 = 255;

/// Permission bits of files created by output redirection.
const OUTPUT_MODE: libc::c_uint = 0o600;

/// A stage converted to the form the kernel expects.
#[derive(Debug)]
pub struct PreparedStage {
    argv: Vec<CString>,
    input: Option<CString>,
    output: Option<CString>,
}

impl PreparedStage {
    pub fn new(stage: &Stage) -> Result<Self, PipelineError> {
        let argv = stage
            .arguments
            .iter()
            .map(|arg| c_string(arg.as_bytes(), arg))
            .collect::<Result<Vec<_>, _>>()?;
        let input = stage.input_redirect.as_deref().map(c_path).transpose()?;
        let output = stage.output_redirect.as_deref().map(c_path).transpose()?;
        Ok(PreparedStage {
            argv,
            input,
            output,
        })
    }
}

fn c_string(bytes: &[u8], display: &str) -> Result<CString, PipelineError> {
    CString::new(bytes).map_err(|_| PipelineError::NulInArgument(display.to_string()))
}

fn c_path(path: &Path) -> Result<CString, PipelineError> {
    c_string(path.as_os_str().as_bytes(), &path.to_string_lossy())
}

/// Why a child gave up before exec replaced it.
enum ChildFailure<'a> {
    Open { path: &'a CStr, errno: Errno },
    Dup { errno: Errno },
    Signal { errno: Errno },
    Exec { program: &'a CStr, errno: Errno },
}

impl ChildFailure<'_> {
    fn report(&self) {
        let mut stderr = std::io::stderr();
        let _ = match self {
            ChildFailure::Open { path, errno } => {
                writeln!(stderr, "{}: {}", path.to_string_lossy(), errno.desc())
            }
            ChildFailure::Dup { errno } => writeln!(stderr, "dup2: {}", errno.desc()),
            ChildFailure::Signal { errno } => writeln!(stderr, "signal: {}", errno.desc()),
            ChildFailure::Exec { program, errno } => {
                writeln!(stderr, "{}: {}", program.to_string_lossy(), errno.desc())
            }
        };
    }
}

/// Sets up the descriptors of a freshly forked stage and executes its program.
///
/// `upstream` is the read end of the previous stage's pipe and `outbound` the
/// pipe this stage writes into. Both are consumed: every original descriptor
/// is closed once it has been duplicated onto standard input or output.
/// Returns only by terminating the process.
pub fn exec_stage(stage: &PreparedStage, upstream: Option<OwnedFd>, outbound: Option<Pipe>) -> ! {
    // the Rust runtime ignores SIGPIPE, and an ignored signal stays ignored across exec
    if let Err(errno) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) } {
        ChildFailure::Signal { errno }.report();
        unsafe { libc::_exit(FAILURE_EXIT_CODE) }
    }
    let failure = match wire(stage, upstream, outbound) {
        Ok(()) => match execvp(&stage.argv[0], &stage.argv) {
            Ok(never) => match never {},
            Err(errno) => ChildFailure::Exec {
                program: &stage.argv[0],
                errno,
            },
        },
        Err(failure) => failure,
    };
    failure.report();
    unsafe { libc::_exit(FAILURE_EXIT_CODE) }
}

/// Pipes first, then files, so a redirection overrides the pipe on the same
/// stream.
fn wire<'a>(
    stage: &'a PreparedStage,
    upstream: Option<OwnedFd>,
    outbound: Option<Pipe>,
) -> Result<(), ChildFailure<'a>> {
    if let Some(Pipe { reader, writer }) = outbound {
        drop(reader);
        install(writer, libc::STDOUT_FILENO)?;
    }
    if let Some(reader) = upstream {
        install(reader, libc::STDIN_FILENO)?;
    }
    if let Some(path) = &stage.input {
        let file = open(path, libc::O_RDONLY)?;
        install(file, libc::STDIN_FILENO)?;
    }
    if let Some(path) = &stage.output {
        let file = open(path, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC)?;
        install(file, libc::STDOUT_FILENO)?;
    }
    Ok(())
}

fn open(path: &CStr, flags: libc::c_int) -> Result<OwnedFd, ChildFailure<'_>> {
    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC, OUTPUT_MODE) };
    match Errno::result(fd) {
        Ok(fd) => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
        Err(errno) => Err(ChildFailure::Open { path, errno }),
    }
}

/// Makes `fd` available as `target` across exec and closes the original.
fn install<'a>(fd: OwnedFd, target: RawFd) -> Result<(), ChildFailure<'a>> {
    let result = if fd.as_raw_fd() == target {
        // already in place; clear close-on-exec instead of closing it
        let fd = fd.into_raw_fd();
        Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFD, 0) })
    } else {
        Errno::result(unsafe { libc::dup2(fd.as_raw_fd(), target) })
    };
    result.map(drop).map_err(|errno| ChildFailure::Dup { errno })
}
