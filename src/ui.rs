//! Terminal output on stderr
//!
//! stdout belongs to the script, so every status line, spinner and error
//! message goes to stderr. Fancy output only when stderr is a terminal.

use crate::cache::InstallObserver;
use crate::error::ScrunError;
use crate::npm::InstallMode;
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::Duration;

/// Whether stderr is an interactive terminal
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        let ci = std::env::var_os("CI").is_some();
        Self {
            interactive: !ci && std::io::stderr().is_terminal(),
        }
    }

    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}

/// Print a fatal error with its hint
pub fn error(err: &ScrunError) {
    eprintln!("{} {}", style("Error:").red().bold(), err);
    if let Some(hint) = err.hint() {
        eprintln!("{} {}", style("Hint:").cyan(), hint);
    }
}

/// Spinner shown while dependencies are installed into the cache
///
/// The silent offline attempt gets a spinner. The network attempt lets npm
/// print, so the spinner is cleared first and replaced by a plain line.
pub struct InstallSpinner {
    ctx: UiContext,
    bar: Mutex<Option<ProgressBar>>,
}

impl InstallSpinner {
    pub fn new(ctx: UiContext) -> Self {
        Self {
            ctx,
            bar: Mutex::new(None),
        }
    }

    fn start(&self, message: String) {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
        );
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(120));
        self.replace(Some(bar));
    }

    fn replace(&self, next: Option<ProgressBar>) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(previous) = slot.take() {
                previous.finish_and_clear();
            }
            *slot = next;
        }
    }
}

impl InstallObserver for InstallSpinner {
    fn attempt(&self, mode: InstallMode, packages: &str) {
        match mode {
            InstallMode::Offline if self.ctx.use_fancy_output() => {
                self.start(format!("Installing {}", packages));
            }
            InstallMode::Offline => {}
            InstallMode::PreferOffline => {
                self.replace(None);
                eprintln!("{} Installing {}", style("...").dim(), packages);
            }
        }
    }

    fn finished(&self, _success: bool) {
        self.replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_non_interactive() {
        let spinner = InstallSpinner::new(UiContext { interactive: false });
        spinner.attempt(InstallMode::Offline, "semver@^7");
        assert!(spinner.bar.lock().unwrap().is_none());
        spinner.attempt(InstallMode::PreferOffline, "semver@^7");
        spinner.finished(true);
    }

    #[test]
    fn spinner_interactive_clears_on_finish() {
        let spinner = InstallSpinner::new(UiContext { interactive: true });
        spinner.attempt(InstallMode::Offline, "semver@^7");
        assert!(spinner.bar.lock().unwrap().is_some());
        spinner.finished(false);
        assert!(spinner.bar.lock().unwrap().is_none());
    }
}
