use std::io::{BufRead, Write};

/// Asks a human (or a test) whether to go ahead.
pub trait Confirmer {
    fn confirm(&self, summary: &str) -> bool;
}

/// Only `y` or `yes` (any case, surrounding whitespace ignored) count.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Prints the summary to stderr and reads one line from stdin.
/// EOF or a read error counts as "no".
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, summary: &str) -> bool {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{summary}\nProceed? [y/N] ");
        let _ = stderr.flush();

        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => is_affirmative(&answer),
        }
    }
}

/// Non-interactive approval (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirmer for AssumeYes {
    fn confirm(&self, summary: &str) -> bool {
        tracing::info!("confirmation skipped (--yes)");
        tracing::debug!(summary = %summary, "run summary");
        true
    }
}
