use crate::command::{ParseError, Stage, PIPE_OPERATOR};
use crate::error::PipelineError;
use crate::jobs::{self, ProcessHandle};
use crate::redirects::{self, PreparedStage};
use nix::fcntl::OFlag;
use nix::unistd::{fork, pipe2, ForkResult};
use std::io::Write;
use std::os::fd::OwnedFd;
use tracing::{debug, trace, warn};

/// Token separators: ASCII space, tab, newline, vertical tab, form feed and
/// carriage return. Other Unicode spaces are part of a token.
pub fn is_separator(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0b'
}

/// Splits a line on separators. There is no quoting.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split(is_separator)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Groups tokens into stages at standalone `|` tokens.
///
/// A leading or trailing `|`, or two adjacent ones, produce an empty stage.
pub fn split_stages<'a, 't>(tokens: &'t [&'a str]) -> Vec<&'t [&'a str]> {
    tokens.split(|token| *token == PIPE_OPERATOR).collect()
}

/// Validates every stage of the line independently.
pub fn parse_stages(line: &str) -> Vec<Result<Stage, ParseError>> {
    let tokens = tokenize(line);
    let stages = split_stages(&tokens);
    let count = stages.len();
    stages
        .iter()
        .enumerate()
        .map(|(index, tokens)| {
            let following = (index + 1 < count).then_some(PIPE_OPERATOR);
            Stage::parse(tokens, following, index, count)
        })
        .collect()
}

/// Parses a line into a runnable pipeline, or the first error of any stage.
///
/// e.g., "sort < names.txt | uniq -c > counts.txt" -> two stages, the first
/// reading `names.txt` and the second writing `counts.txt`
pub fn parse_pipeline(line: &str) -> Result<Vec<Stage>, ParseError> {
    let results = parse_stages(line);
    if let Some((index, Err(error))) = results.iter().enumerate().find(|(_, r)| r.is_err()) {
        debug!(stage = index, %error, "rejected line");
    }
    results.into_iter().collect()
}

/// Both ends of a kernel pipe, closed when dropped.
#[derive(Debug)]
pub struct Pipe {
    pub reader: OwnedFd,
    pub writer: OwnedFd,
}

impl Pipe {
    /// Both ends are close-on-exec; a child keeps only what it duplicates
    /// onto its standard streams.
    pub fn new() -> nix::Result<Self> {
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC)?;
        Ok(Pipe { reader, writer })
    }
}

/// Forks one process per stage, connecting neighbours through pipes.
///
/// The parent closes each pipe end as soon as the child that needs it has
/// been forked, so a reader sees end-of-file once its writer finishes. If a
/// pipe or a process cannot be created, the stages already running are killed
/// and reaped before the error is returned.
pub fn spawn_pipeline(stages: Vec<Stage>) -> Result<Vec<ProcessHandle>, PipelineError> {
    let prepared = stages
        .iter()
        .map(PreparedStage::new)
        .collect::<Result<Vec<_>, _>>()?;

    let mut handles = Vec::with_capacity(stages.len());
    let mut upstream: Option<OwnedFd> = None;

    for (stage, prepared) in stages.into_iter().zip(&prepared) {
        let outbound = if stage.has_downstream {
            match Pipe::new() {
                Ok(pipe) => {
                    trace!(?pipe, "created pipe");
                    Some(pipe)
                }
                Err(errno) => {
                    abandon(handles);
                    return Err(PipelineError::Pipe(errno));
                }
            }
        } else {
            None
        };

        match unsafe { fork() } {
            Ok(ForkResult::Child) => redirects::exec_stage(prepared, upstream, outbound),
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), program = stage.program(), "forked stage");
                handles.push(ProcessHandle::new(child, stage));
                // the previous read end now belongs to the child alone
                upstream = outbound.map(|Pipe { reader, writer }| {
                    drop(writer);
                    reader
                });
            }
            Err(errno) => {
                drop(outbound);
                drop(upstream);
                abandon(handles);
                return Err(PipelineError::Fork(errno));
            }
        }
    }

    Ok(handles)
}

fn abandon(handles: Vec<ProcessHandle>) {
    for handle in handles {
        warn!(pid = handle.pid().as_raw(), "killing stage of an incomplete pipeline");
        handle.terminate();
    }
}

/// Runs a parsed pipeline to completion and writes one status line per stage
/// to `out`, in stage order.
pub fn run_pipeline<W: Write>(stages: Vec<Stage>, out: &mut W) -> Result<(), PipelineError> {
    let handles = spawn_pipeline(stages)?;
    jobs::report_statuses(handles, out)
}
