//! `same`: a hermetic, cache-aware task runner for monorepos (spec §6).
//!
//! Three subcommands, one entry point: `run` dispatches through the
//! in-process scheduler or the daemon depending on `--no-daemon`, `daemon
//! serve` runs the background process in the foreground, and `version`
//! prints build metadata. A single `tokio::select!` over `ctrl_c` and the
//! real body lets Ctrl-C cancel an in-flight run cleanly rather than
//! killing the process mid-write.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use same::cli::{Cli, Commands, DaemonCommand};
use same::error::{exit_code_for, CliError};
use same::run::{run as run_tasks, RunOptions};

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("same panicked: {panic_info}");
        eprintln!("this is a bug; please re-run with RUST_LOG=debug and file an issue");
    }));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let exit_code = real_main().await;
    std::process::exit(exit_code);
}

/// Exit code for a Ctrl-C interrupt (128 + `SIGINT`'s signal number).
const EXIT_SIGINT: i32 = 130;

#[instrument(name = "same_main")]
async fn real_main() -> i32 {
    let cli = Cli::parse();
    let cancellation = CancellationToken::new();

    tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            cancellation.cancel();
            EXIT_SIGINT
        }
        result = dispatch(cli, cancellation.clone()) => {
            match result {
                Ok(()) => 0,
                Err(err) => {
                    eprintln!("error: {err}");
                    exit_code_for(&err)
                }
            }
        }
    }
}

async fn dispatch(cli: Cli, cancellation: CancellationToken) -> Result<(), CliError> {
    let root = resolve_root(cli.root)?;

    match cli.command {
        Commands::Run {
            targets,
            no_cache,
            inspect,
            no_daemon,
            output,
            concurrency,
        } => {
            let options = RunOptions {
                targets,
                no_cache,
                inspect,
                no_daemon,
                output,
                concurrency,
            };
            run_tasks(&root, options, cancellation).await
        }
        Commands::Daemon(DaemonCommand::Serve) => run_daemon_serve(root, cancellation).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Resolves the workspace root: the `--root` flag if given, otherwise the
/// current directory.
fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir().map_err(CliError::Io),
    }
}

/// Runs `same daemon serve`: builds a [`same_daemon::DaemonServer`] from
/// the concrete collaborators (spec §4.9) and serves until idle timeout
/// or an explicit `Shutdown` RPC.
async fn run_daemon_serve(root: PathBuf, cancellation: CancellationToken) -> Result<(), CliError> {
    use same_core::collaborators::{GlobInputResolver, StaticToolEnvironment};
    use same_core::config::YamlConfigLoader;
    use same_daemon::lifecycle::DEFAULT_IDLE_TIMEOUT;
    use same_daemon::DaemonServer;
    use std::sync::Arc;

    let server = Arc::new(DaemonServer::new(
        root,
        Arc::new(YamlConfigLoader),
        Arc::new(StaticToolEnvironment),
        Arc::new(GlobInputResolver),
        DEFAULT_IDLE_TIMEOUT,
    ));

    tokio::select! {
        biased;
        () = cancellation.cancelled() => Ok(()),
        result = server.run() => result.map_err(CliError::from),
    }
}

fn print_version() {
    println!(
        "same {} ({}, {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("SAME_BUILD_COMMIT").unwrap_or("unknown"),
        option_env!("SAME_BUILD_DATE").unwrap_or("unknown")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_root_defaults_to_cwd() {
        let root = resolve_root(None).unwrap();
        assert_eq!(root, std::env::current_dir().unwrap());
    }

    #[test]
    fn resolve_root_honors_explicit_flag() {
        let root = resolve_root(Some(PathBuf::from("/tmp"))).unwrap();
        assert_eq!(root, PathBuf::from("/tmp"));
    }
}
