//! Terminal progress for shard workers.
//!
//! On a TTY every busy worker gets a line showing the shard it is reading
//! and how far through the compressed bytes it is. Off a TTY all bars are
//! hidden and progress is reported through periodic log lines instead.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const PREFIX_WIDTH: usize = 24;

fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:<24.dim} {bar:30.green/dim} {binary_bytes:>9}/{binary_total_bytes:9} {wide_msg:.dim}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("--")
}

fn waiting_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:<24.dim} {spinner:.dim} {wide_msg:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Switch a worker line to a byte bar once the shard size is known.
pub fn show_bytes(pb: &ProgressBar, total: u64) {
    pb.set_length(total);
    pb.set_position(0);
    pb.set_style(bytes_style());
}

/// Owns the `MultiProgress` all worker lines hang off.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    /// Hidden context for tests and piped output.
    pub fn hidden() -> Self {
        Self::with_tty(false)
    }

    fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// One line per worker, reused for every shard that worker takes.
    pub fn worker_line(&self, worker: usize) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(waiting_style());
        pb.set_prefix(format!("worker {worker}"));
        pb.set_message("waiting for shard");
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    /// Point a worker line at a new shard.
    pub fn start_shard(&self, pb: &ProgressBar, label: &str) {
        pb.set_style(waiting_style());
        pb.set_prefix(truncate_label(label));
        pb.set_message("connecting");
    }

    /// Spinner line for whole-run status (enumeration, totals).
    pub fn status_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Print above the bars, or to stderr when there are none.
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// For wiring the log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the tail of long shard names; the distinguishing part is at the end.
fn truncate_label(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() <= PREFIX_WIDTH {
        return label.to_string();
    }
    let tail: String = chars[chars.len() - (PREFIX_WIDTH - 1)..].iter().collect();
    format!("…{tail}")
}

/// Format number with thousand separators.
pub fn fmt_num(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
