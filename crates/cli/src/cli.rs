//! Argument parsing (spec §6): three subcommands, no more. Grounded on the
//! teacher's `cli.rs` derive shape, scaled down from its env/task/exec/ci/
//! tui/web/changeset/release surface to the narrow one this crate needs.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// A hermetic, cache-aware task runner for monorepos.
#[derive(Debug, Parser)]
#[command(name = "same", version, about, long_about = None)]
pub struct Cli {
    /// Workspace root; defaults to the current directory.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// The three top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Runs one or more tasks, along with their dependencies.
    Run {
        /// Task names to run; their transitive dependencies run first.
        targets: Vec<String>,

        /// Bypasses the build-info cache, forcing every task to run.
        #[arg(short = 'n', long = "no-cache")]
        no_cache: bool,

        /// Prints the resolved execution plan without running anything.
        #[arg(short = 'i', long = "inspect")]
        inspect: bool,

        /// Runs tasks in-process instead of through the `same` daemon.
        #[arg(long = "no-daemon")]
        no_daemon: bool,

        /// Output renderer; `auto` picks `tui` on an interactive terminal
        /// and `linear` otherwise, honoring `CI` and `NO_COLOR`.
        #[arg(long = "output", value_enum, default_value_t = OutputFormat::Auto)]
        output: OutputFormat,

        /// Maximum number of tasks executing concurrently; defaults to the
        /// number of logical CPUs.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Daemon process management.
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Prints version, commit, and build date.
    Version,
}

/// `same daemon <...>`.
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Runs the daemon in the foreground until idle timeout or shutdown.
    Serve,
}

/// How to render task progress (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// TUI on a terminal, linear otherwise; honors `CI`/`NO_COLOR`.
    #[default]
    Auto,
    /// Full-screen `ratatui` view.
    Tui,
    /// Line-buffered stdout/stderr writes.
    Linear,
    /// Linear with colors forced off, for CI log capture.
    Ci,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_targets_and_flags() {
        let cli = Cli::parse_from(["same", "run", "build", "test", "--no-cache", "--concurrency", "4"]);
        match cli.command {
            Commands::Run { targets, no_cache, concurrency, .. } => {
                assert_eq!(targets, vec!["build".to_string(), "test".to_string()]);
                assert!(no_cache);
                assert_eq!(concurrency, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn daemon_serve_parses() {
        let cli = Cli::parse_from(["same", "daemon", "serve"]);
        assert!(matches!(cli.command, Commands::Daemon(DaemonCommand::Serve)));
    }
}
