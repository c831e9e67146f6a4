use crate::pipes::{is_separator, parse_pipeline, run_pipeline};
use crate::prompt::Prompt;
use anyhow::Context;
use std::io::{self, BufRead};
use std::process::ExitCode;
use tracing::{debug, error};

/// What the read loop does with one line of input.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Blank,
    Comment,
    Exit,
    Pipeline(&'a str),
}

impl<'a> Line<'a> {
    fn classify(line: &'a str) -> Self {
        let trimmed = line.trim_matches(is_separator);
        if trimmed.is_empty() {
            Line::Blank
        } else if trimmed.starts_with('#') {
            Line::Comment
        } else if trimmed == "exit" {
            Line::Exit
        } else {
            Line::Pipeline(line)
        }
    }
}

/// Result of running one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Completed,
    Invalid,
    Failed,
}

impl LineStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            LineStatus::Completed => ExitCode::SUCCESS,
            LineStatus::Invalid => ExitCode::from(2),
            LineStatus::Failed => ExitCode::FAILURE,
        }
    }
}

/// Parses and runs one line, printing status reports to standard output and
/// errors to standard error.
pub fn execute_line(line: &str) -> LineStatus {
    let stages = match parse_pipeline(line) {
        Ok(stages) => stages,
        Err(e) => {
            eprintln!("Invalid command: {}", e);
            return LineStatus::Invalid;
        }
    };
    debug!(stages = stages.len(), "running pipeline");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run_pipeline(stages, &mut out) {
        Ok(()) => LineStatus::Completed,
        Err(e) => {
            error!(error = %e, "pipeline failed");
            eprintln!("{}", e);
            LineStatus::Failed
        }
    }
}

pub struct Shell {
    prompt: Prompt,
    running: bool,
}

impl Shell {
    pub fn new(prompt: Prompt) -> Self {
        Self {
            prompt,
            running: true,
        }
    }

    /// Reads and runs lines until `exit` or end of input.
    pub fn run<R: BufRead>(&mut self, mut input: R) -> anyhow::Result<()> {
        let mut line = String::new();
        while self.running {
            self.prompt
                .display(&mut io::stdout())
                .context("cannot write prompt")?;

            line.clear();
            if input.read_line(&mut line).context("cannot read input")? == 0 {
                break;
            }
            let text = line.trim_end_matches(['\n', '\r']);

            match Line::classify(text) {
                Line::Blank | Line::Comment => {}
                Line::Exit => self.running = false,
                Line::Pipeline(text) => {
                    execute_line(text);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_lines() {
        assert_eq!(Line::classify(""), Line::Blank);
        assert_eq!(Line::classify(" \t "), Line::Blank);
        assert_eq!(Line::classify("# a comment | with pipes"), Line::Comment);
        assert_eq!(Line::classify("   exit  "), Line::Exit);
        assert_eq!(Line::classify("exit now"), Line::Pipeline("exit now"));
        assert_eq!(Line::classify("/bin/true"), Line::Pipeline("/bin/true"));
        assert_eq!(Line::classify("\x0b\x0cexit\t"), Line::Exit);
        assert_eq!(Line::classify("\u{a0}exit"), Line::Pipeline("\u{a0}exit"));
        assert_eq!(Line::classify("\u{a0}"), Line::Pipeline("\u{a0}"));
    }

    #[test]
    fn invalid_line_runs_nothing() {
        assert_eq!(execute_line("> foo.txt < bar.txt"), LineStatus::Invalid);
        assert_eq!(execute_line("/bin/true > "), LineStatus::Invalid);
    }

    #[test]
    fn exit_stops_reading() {
        let mut shell = Shell::new(Prompt::silent());
        shell.run(&b"# comment\n\nexit\ntrue\n"[..]).unwrap();
        assert!(!shell.running);
    }

    #[test]
    fn end_of_input_stops_reading() {
        let mut shell = Shell::new(Prompt::silent());
        shell.run(&b""[..]).unwrap();
        assert!(shell.running);
    }
}
