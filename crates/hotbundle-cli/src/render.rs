use std::io::IsTerminal;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Color, Effects, Style};
use hotbundle_installer::ProgressEvent;
use hotbundle_registry::ProgressCallback;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    )
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    /// Section headers only appear in rich output.
    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", paint(SECTION, &format!("== {title} ==")));
        }
    }

    pub(crate) fn start_progress(self, label: &str) -> Arc<Mutex<TerminalProgress>> {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(1);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<8} [{bar:20.cyan/blue}] {bytes:>10}/{total_bytes:10} {elapsed_precise}",
            ) {
                progress_bar.set_style(
                    style
                        .tick_chars(progress_tick_chars(label))
                        .progress_chars("=>-"),
                );
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        Arc::new(Mutex::new(TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total: 0,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }))
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

impl TerminalProgress {
    pub(crate) fn set(&mut self, current: u64, total: u64) {
        self.total = total.max(current);
        self.current = current;

        let Some(progress_bar) = &self.progress_bar else {
            return;
        };

        let safe_total = self.total.max(1);
        progress_bar.set_length(safe_total);
        progress_bar.set_position(self.current.min(safe_total));
    }

    pub(crate) fn finish_success(&mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }

    pub(crate) fn finish_abandon(&mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn lock_progress(
    progress: &Mutex<TerminalProgress>,
) -> MutexGuard<'_, TerminalProgress> {
    progress
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Engine progress callback feeding `progress`.
pub(crate) fn progress_callback(progress: &Arc<Mutex<TerminalProgress>>) -> ProgressCallback {
    let progress = Arc::clone(progress);
    Box::new(move |event: ProgressEvent| {
        lock_progress(&progress).set(event.received, event.total)
    })
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis())
}

fn progress_tick_chars(label: &str) -> &'static str {
    match label {
        "download" => ".oO@* ",
        "package" => "<^>v ",
        _ => "|/-\\ ",
    }
}

const SECTION: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::BrightBlue)))
    .effects(Effects::BOLD);

const PROGRESS_LABEL: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::BrightCyan)))
    .effects(Effects::BOLD);

const PROGRESS_BAR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlue)));

fn paint(style: Style, text: &str) -> String {
    format!("{}{text}{}", style.render(), style.render_reset())
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    const BAR_WIDTH: u64 = 18;
    let safe_total = total.max(1);
    let received = current.min(safe_total);
    let filled = (received * BAR_WIDTH / safe_total) as usize;
    let bar = "=".repeat(filled) + &"-".repeat(BAR_WIDTH as usize - filled);
    let mut line = format!(
        "{} [{}] {:>3}% {}/{}",
        paint(PROGRESS_LABEL, label),
        paint(PROGRESS_BAR, &bar),
        received * 100 / safe_total,
        HumanBytes(current),
        HumanBytes(total)
    );
    if let Some(elapsed) = elapsed {
        line.push_str(&format!(" complete in {}", format_elapsed(elapsed)));
    }
    Some(line)
}
