use clap::Parser;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod command;
mod error;
mod jobs;
mod pipes;
mod prompt;
mod redirects;
mod shell;

use prompt::Prompt;
use shell::Shell;

/// pipesh - runs pipelines of programs, one line at a time
#[derive(Parser)]
#[command(name = "pipesh", version, about)]
struct Cli {
    /// Prompt printed before each line is read
    #[arg(long, env = "PIPESH_PROMPT", default_value = prompt::DEFAULT_PROMPT)]
    prompt: String,

    /// Do not print a prompt
    #[arg(short, long)]
    quiet: bool,

    /// Run a single line and exit
    #[arg(short = 'c', value_name = "LINE")]
    command: Option<String>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("PIPESH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    if let Some(line) = cli.command {
        return shell::execute_line(&line).exit_code();
    }

    let prompt = if cli.quiet {
        Prompt::silent()
    } else {
        Prompt::new(cli.prompt)
    };
    let mut shell = Shell::new(prompt);

    match shell.run(io::stdin().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pipesh: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
