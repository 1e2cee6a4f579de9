//! Terminal feedback for the binaries: named stages and a live status line.
//!
//! Pretty output (spinners) is used only when stderr is a terminal; otherwise
//! everything degrades to plain `==>` lines that read well in logs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::cell::RefCell;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag.trim().to_ascii_lowercase().as_str() {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    stderr_is_tty: bool,
    /// Auto mode stays plain when stdout is piped.
    stdout_is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_is_tty: bool, stdout_is_tty: bool) -> Self {
        Self {
            mode,
            stderr_is_tty,
            stdout_is_tty,
        }
    }

    pub fn from_flag(flag: &str, stderr_is_tty: bool, stdout_is_tty: bool) -> Self {
        Self::new(UiMode::parse(flag), stderr_is_tty, stdout_is_tty)
    }

    pub fn is_pretty(&self) -> bool {
        self.stderr_is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => self.stdout_is_tty,
                UiMode::Plain => false,
            }
    }

    /// A named step; completion and elapsed time are reported when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.is_pretty() {
            let spinner = spinner_with("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// A status line rewritten in place while the detection loop runs.
    pub fn live(&self, label: &str) -> LiveStatus {
        let spinner = self
            .is_pretty()
            .then(|| spinner_with(&format!("{{spinner}} {label} {{msg}}")));
        LiveStatus {
            label: label.to_string(),
            spinner,
            last_plain: RefCell::new(String::new()),
        }
    }
}

fn spinner_with(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style =
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_elapsed(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

pub struct LiveStatus {
    label: String,
    spinner: Option<ProgressBar>,
    last_plain: RefCell<String>,
}

impl LiveStatus {
    /// Update the line. Plain mode prints only when the text changes.
    pub fn set(&self, message: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(message.to_string());
            return;
        }
        let mut last = self.last_plain.borrow_mut();
        if *last != message {
            eprintln!("--> {}: {}", self.label, message);
            *last = message.to_string();
        }
    }

    pub fn finish(self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => eprintln!("✔ {}: {}", self.label, message),
        }
    }
}

pub fn format_elapsed(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
