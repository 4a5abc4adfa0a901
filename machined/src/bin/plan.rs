//! machined-plan: print the phase table of a lifecycle sequence.
//!
//! Useful to review what a sequence would do before triggering it. Nothing
//! is executed; conditional phases are marked, not evaluated.

use clap::Parser;
use machined::pipeline::{ExecutionMode, Phase, PhasePolicy};
use machined::{MachinedResult, RuntimeOptions, Sequence, Sequencer, init_logging};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "machined-plan")]
#[command(about = "Show the phases and tasks of a machined sequence")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Sequence to show (boot, install, upgrade, reset, ...). Omit to list all.
    sequence: Option<Sequence>,

    /// Runtime options file (JSON); validated before printing
    #[arg(short, long)]
    options: Option<PathBuf>,

    /// Also log to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> MachinedResult<()> {
    let options = match &cli.options {
        Some(path) => RuntimeOptions::from_file(path)?,
        None => RuntimeOptions::default(),
    };
    // The built-in log dir is a host path; only honor one from an options file.
    let log_dir = match (&cli.log_dir, &cli.options) {
        (Some(dir), _) => Some(dir.clone()),
        (None, Some(_)) => options.log_dir.clone(),
        (None, None) => None,
    };
    init_logging(log_dir.as_deref())?;

    tracing::debug!(config = %options.config_path.display(), "Runtime options loaded");

    let sequences = match cli.sequence {
        Some(sequence) => vec![sequence],
        None => Sequence::ALL.to_vec(),
    };

    for sequence in sequences {
        print_plan(sequence, &Sequencer::plan(sequence));
    }
    Ok(())
}

fn print_plan(sequence: Sequence, phases: &[Phase]) {
    println!("{}", sequence);
    for (index, phase) in phases.iter().enumerate() {
        let execution = match phase.execution() {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        };
        let policy = match phase.policy() {
            PhasePolicy::Fatal => "fatal",
            PhasePolicy::LogAndContinue => "best-effort",
        };
        let conditional = if phase.is_conditional() { " (conditional)" } else { "" };

        println!(
            "  {:>2}. {:<28} {:<10} {}{}",
            index + 1,
            phase.name(),
            execution,
            policy,
            conditional
        );
        for task in phase.tasks() {
            println!("        - {}", task.name());
        }
    }
    println!();
}
