//! Failures of the orchestrating process itself.
//!
//! Failures inside a child (a redirection file that cannot be opened, a
//! program that cannot be executed) never show up here: the child reports
//! them and exits with [`FAILURE_EXIT_CODE`](crate::redirects::FAILURE_EXIT_CODE).

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// An argument or file name holds a NUL byte and cannot be passed to the kernel.
    #[error("argument contains a NUL byte: {0:?}")]
    NulInArgument(String),

    #[error("cannot create pipe: {}", .0.desc())]
    Pipe(#[source] Errno),

    #[error("cannot fork: {}", .0.desc())]
    Fork(#[source] Errno),

    #[error("cannot wait for process {pid}: {}", .source.desc())]
    Wait {
        pid: i32,
        #[source]
        source: Errno,
    },

    #[error("cannot write status report: {0}")]
    Report(#[source] std::io::Error),
}
