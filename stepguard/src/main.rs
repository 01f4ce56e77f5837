//! Step-policy enforcement for agentic coding sessions.
//!
//! The host calls `stepguard hook <event>` around every tool call and at
//! session end, passing the event as JSON on stdin. Stepguard answers on
//! stdout and keeps its state under `.stepguard/`.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use stepguard::exit_codes;
use stepguard::hook::{HookKind, dispatch};
use stepguard::io::paths::StepguardPaths;
use stepguard::logging;
use stepguard::validate::{ValidateOutcome, validate_project};

#[derive(Parser)]
#[command(
    name = "stepguard",
    version,
    about = "Enforce a six-step development workflow on agent tool calls"
)]
struct Cli {
    /// Project root containing `.stepguard/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one hook event read from stdin and print the response.
    Hook {
        #[arg(value_enum)]
        event: HookKind,
    },
    /// Check config and state documents without modifying them.
    Validate,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Hook { event } => run_hook(event, &cli.root),
        Command::Validate => run_validate(&cli.root),
    };
    std::process::exit(code);
}

fn run_hook(kind: HookKind, root: &Path) -> i32 {
    let paths = StepguardPaths::new(root);
    // An unreadable stdin is handled like malformed input.
    let input = read_stdin().unwrap_or_default();
    let reply = dispatch(kind, &paths, &input, Utc::now());
    println!("{}", reply.body);
    if let Some(message) = reply.stderr {
        eprintln!("{message}");
    }
    reply.exit_code
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("read hook event from stdin")?;
    Ok(input)
}

fn run_validate(root: &Path) -> i32 {
    match validate_project(root) {
        Ok(ValidateOutcome::NotStarted) => {
            println!("ok: no workflow state yet");
            exit_codes::OK
        }
        Ok(ValidateOutcome::Ok {
            status,
            step,
            objective,
            phase,
            warnings,
        }) => {
            for warning in &warnings {
                eprintln!("warning: {warning}");
            }
            println!(
                "ok: {} at step {} ({}), {objective} in {phase}",
                status.label(),
                step.ordinal(),
                step.name()
            );
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}
