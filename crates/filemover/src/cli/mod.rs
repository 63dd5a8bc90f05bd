pub mod apply;
pub mod config;
pub mod dry_run;
pub mod plan;
pub mod scan;
pub mod undo;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use log::error;

use filemover_lib::{ExecStatus, FileMoverError};

// Exit codes: 0 success, 2 input error, 3 partial, 4 cancelled, 5 I/O fatal.
pub const EXIT_OK: u8 = 0;
pub const EXIT_INPUT: u8 = 2;
pub const EXIT_PARTIAL: u8 = 3;
pub const EXIT_CANCELLED: u8 = 4;
pub const EXIT_FATAL: u8 = 5;

#[derive(Parser)]
#[command(name = "filemover")]
#[command(about = "Rule-driven folder reorganizer: scan, plan, apply, undo", long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Scan roots and emit matched folders as JSON")]
    Scan {
        #[arg(long, num_args = 1.., help = "Root directories to scan (overrides config roots)")]
        roots: Vec<PathBuf>,

        #[arg(long, help = "Configuration file with rules and options")]
        config: PathBuf,

        #[arg(long, short = 'o', help = "Write hits to a file instead of stdout")]
        output: Option<PathBuf>,
    },

    #[command(about = "Build a move plan from scan hits")]
    Plan {
        #[arg(long, help = "Hits file produced by scan")]
        input: PathBuf,

        #[arg(long, help = "Rules file (bare array or full config)")]
        rules: PathBuf,

        #[arg(long, short = 'o', help = "Plan output path")]
        output: PathBuf,

        #[arg(long, help = "Disallow cross-volume copy+delete operations")]
        no_cross_volume: bool,
    },

    #[command(name = "dry-run", about = "Simulate a plan without touching the filesystem")]
    DryRun {
        #[arg(long, help = "Plan file to simulate")]
        plan: PathBuf,
    },

    #[command(about = "Execute a plan, journaling every operation")]
    Apply {
        #[arg(long, help = "Plan file to execute")]
        plan: PathBuf,

        #[arg(long, help = "Journal output path (.jsonl)")]
        journal: Option<PathBuf>,

        #[arg(long, short = 'y', help = "Skip the confirmation prompt")]
        yes: bool,

        #[arg(long, help = "Worker thread count")]
        threads: Option<usize>,
    },

    #[command(about = "Reverse a completed execution from its journal")]
    Undo {
        #[arg(long, help = "Journal file to replay in reverse")]
        journal: PathBuf,

        #[arg(long, short = 'y', help = "Skip the confirmation prompt")]
        yes: bool,

        #[arg(long, help = "Restore even destinations that changed after the move")]
        force: bool,
    },

    #[command(about = "Validate and inspect configuration files")]
    Config {
        #[command(subcommand)]
        action: config::ConfigCommands,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Commands::Scan {
            roots,
            config,
            output,
        } => scan::handle(roots, config, output, cli.verbose),
        Commands::Plan {
            input,
            rules,
            output,
            no_cross_volume,
        } => plan::handle(input, rules, output, no_cross_volume, cli.verbose),
        Commands::DryRun { plan } => dry_run::handle(plan),
        Commands::Apply {
            plan,
            journal,
            yes,
            threads,
        } => apply::handle(plan, journal, yes, threads),
        Commands::Undo {
            journal,
            yes,
            force,
        } => undo::handle(journal, yes, force),
        Commands::Config { action } => config::handle(action),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(error: &FileMoverError) -> u8 {
    match error {
        FileMoverError::Config(_)
        | FileMoverError::Pattern { .. }
        | FileMoverError::Template { .. }
        | FileMoverError::PlanValidation(_)
        | FileMoverError::InvalidNodeId(_)
        | FileMoverError::Json(_) => EXIT_INPUT,
        FileMoverError::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FATAL,
    }
}

pub fn exit_code_for_status(status: ExecStatus) -> u8 {
    match status {
        ExecStatus::Ok => EXIT_OK,
        ExecStatus::Partial => EXIT_PARTIAL,
        ExecStatus::Cancelled => EXIT_CANCELLED,
        ExecStatus::Fatal => EXIT_FATAL,
    }
}
