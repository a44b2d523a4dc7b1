use std::io::Write;
use tails_server::status::{short_label, StatusEvent};

/// Where commands send what the user should read.
///
/// Logging goes through `tracing` to stderr; this is for the answers and
/// status lines themselves, which `--quiet` suppresses.
pub trait UserOutput: Send + Sync {
    /// Informational line (e.g. a status row)
    fn status(&self, message: &str);

    /// Operation finished (e.g. "mumble enabled")
    fn success(&self, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Inline progress (no trailing newline). Call `finish_progress` after.
    fn progress(&self, message: &str);

    fn finish_progress(&self, result: &str);

    fn blank(&self);

    /// One status change as it happens.
    fn status_event(&self, event: &StatusEvent) {
        let marker = short_label(event.status).unwrap_or("");
        self.status(&format!(
            "{} {:<6} {:<16} {}",
            event.at.format("%H:%M:%S"),
            marker,
            event.service,
            event.status.label()
        ));
    }
}

/// Standard CLI output on stdout/stderr.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn progress(&self, message: &str) {
        print!("{}", message);
        std::io::stdout().flush().ok();
    }

    fn finish_progress(&self, result: &str) {
        println!("{}", result);
    }

    fn blank(&self) {
        println!();
    }
}

/// Only errors get through. Selected by `--quiet`.
pub struct QuietOutput;

impl UserOutput for QuietOutput {
    fn status(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, message: &str) {
        eprintln!("{}", message);
    }
    fn progress(&self, _message: &str) {}
    fn finish_progress(&self, _result: &str) {}
    fn blank(&self) {}
}
