//! The event stream fed to a renderer, and two concrete renderers
//! (spec §9 "state machines in place of callbacks").

use std::io::{self, IsTerminal, Write};

/// One lifecycle event for a single task, or for the run as a whole.
///
/// Per-task events are totally ordered `Start -> Log* -> Complete`, but no
/// inter-task ordering is guaranteed (spec §5).
#[derive(Debug, Clone)]
pub enum RenderEvent {
    /// The scheduler has computed the execution plan.
    Plan {
        /// Task names in dispatch order.
        tasks: Vec<String>,
    },
    /// A task has been dispatched for execution (cache miss).
    TaskStart {
        /// The task's name.
        name: String,
        /// The command being run, for display.
        command: String,
    },
    /// A chunk of a running task's merged stdout/stderr.
    TaskLog {
        /// The task's name.
        name: String,
        /// Raw output bytes, lossily decoded for display.
        chunk: String,
    },
    /// A task finished, whether cached, succeeded, or failed.
    TaskComplete {
        /// The task's name.
        name: String,
        /// The outcome.
        outcome: TaskOutcome,
    },
}

/// How a task's dispatch resolved.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The build-info cache matched; the command was not run.
    Cached,
    /// The command ran and exited zero.
    Succeeded {
        /// Wall-clock duration in milliseconds.
        duration_ms: u128,
    },
    /// The command ran and exited non-zero, or failed to spawn.
    Failed {
        /// A human-readable description of the failure.
        message: String,
    },
    /// A dependency failed, so this task was never dispatched.
    SkippedFailed {
        /// The dependency that failed.
        failed_dependency: String,
    },
}

/// Consumes the scheduler's event stream. Implementations choose between
/// an event-loop TUI and a line-buffered linear logger; the scheduler is
/// oblivious to which is active.
pub trait Renderer: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: RenderEvent);
}

/// Line-buffered renderer: one line per lifecycle transition, `print!`
/// directly to stdout/stderr. This is the output layer — direct
/// stdout/stderr writes are intentional here, not a layering violation.
#[derive(Debug, Clone)]
pub struct LinearRenderer {
    colors: bool,
}

impl Default for LinearRenderer {
    fn default() -> Self {
        let no_color = std::env::var("NO_COLOR").is_ok_and(|v| !v.is_empty());
        Self {
            colors: io::stdout().is_terminal() && !no_color,
        }
    }
}

impl LinearRenderer {
    /// Builds a renderer with an explicit color setting, bypassing the
    /// `NO_COLOR`/TTY autodetection in [`LinearRenderer::default`]. Used by
    /// callers honoring an explicit `--output {linear|ci}` choice rather
    /// than `auto`.
    #[must_use]
    pub fn with_colors(colors: bool) -> Self {
        Self { colors }
    }

    fn status(&self, symbol: &str, color: &str) -> String {
        if self.colors {
            format!("\x1b[{color}m{symbol}\x1b[0m")
        } else {
            symbol.to_string()
        }
    }
}

#[allow(clippy::print_stdout, clippy::print_stderr)]
impl Renderer for LinearRenderer {
    fn on_event(&self, event: RenderEvent) {
        match event {
            RenderEvent::Plan { tasks } => {
                eprintln!("> plan: {}", tasks.join(", "));
            }
            RenderEvent::TaskStart { name, command } => {
                eprintln!("> [{name}] {command}");
            }
            RenderEvent::TaskLog { chunk, .. } => {
                print!("{chunk}");
                let _ = io::stdout().flush();
            }
            RenderEvent::TaskComplete { name, outcome } => match outcome {
                TaskOutcome::Cached => {
                    eprintln!("{} [{name}] (cached)", self.status("~", "33"));
                }
                TaskOutcome::Succeeded { duration_ms } => {
                    eprintln!("{} [{name}] done in {duration_ms}ms", self.status("\u{2713}", "32"));
                }
                TaskOutcome::Failed { message } => {
                    eprintln!("{} [{name}] {message}", self.status("\u{2717}", "31"));
                }
                TaskOutcome::SkippedFailed { failed_dependency } => {
                    eprintln!(
                        "{} [{name}] skipped, dependency '{failed_dependency}' failed",
                        self.status("\u{2717}", "31")
                    );
                }
            },
        }
    }
}

/// CI-friendly renderer: identical to [`LinearRenderer`] but with colors
/// forced off, selected when `CI` is set (spec §6).
#[must_use]
pub fn renderer_for_env() -> LinearRenderer {
    let ci = std::env::var("CI").is_ok_and(|v| v == "true" || v == "1");
    if ci {
        LinearRenderer { colors: false }
    } else {
        LinearRenderer::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_renderer_does_not_panic_on_any_event() {
        let renderer = LinearRenderer { colors: false };
        renderer.on_event(RenderEvent::Plan {
            tasks: vec!["a".to_string()],
        });
        renderer.on_event(RenderEvent::TaskStart {
            name: "a".to_string(),
            command: "echo hi".to_string(),
        });
        renderer.on_event(RenderEvent::TaskLog {
            name: "a".to_string(),
            chunk: "hi\n".to_string(),
        });
        renderer.on_event(RenderEvent::TaskComplete {
            name: "a".to_string(),
            outcome: TaskOutcome::Succeeded { duration_ms: 10 },
        });
        renderer.on_event(RenderEvent::TaskComplete {
            name: "b".to_string(),
            outcome: TaskOutcome::SkippedFailed {
                failed_dependency: "a".to_string(),
            },
        });
    }
}
